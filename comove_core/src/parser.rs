//! Parsers for the bespoke measurement and ground-truth text formats.
//!
//! All formats are line based with `;`-separated fields. Devices and
//! access points are interned in first-seen order; measurements are
//! sorted by timestamp after ingest because the files do not document
//! any ordering.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;

use crate::error::{Error, Result};
use crate::ground_truth::{GroundTruth, GroundTruthEntry};
use crate::location::{LocationData, LocationDevice, LocationFix};
use crate::signal::{SignalData, SignalDevice, SignalMeasurement};

fn malformed(context: &str, line: &str) -> Error {
    Error::MalformedInput(format!("expected {context} in line: {line}"))
}

fn parse_i64(token: &str, context: &str, line: &str) -> Result<i64> {
    token.parse().map_err(|_| malformed(context, line))
}

fn parse_i32(token: &str, context: &str, line: &str) -> Result<i32> {
    token.parse().map_err(|_| malformed(context, line))
}

fn parse_f64(token: &str, context: &str, line: &str) -> Result<f64> {
    token.parse().map_err(|_| malformed(context, line))
}

/// Looks up an interned index for `name`, inserting it on first sight.
fn intern(indices: &mut HashMap<String, usize>, names: &mut Vec<String>, name: &str) -> usize {
    if let Some(&index) = indices.get(name) {
        return index;
    }
    let index = names.len();
    indices.insert(name.to_string(), index);
    names.push(name.to_string());
    index
}

fn device_entry<'a, T>(
    indices: &mut HashMap<String, usize>,
    devices: &'a mut Vec<T>,
    name: &str,
    create: impl FnOnce(String) -> T,
) -> &'a mut T {
    let index = match indices.get(name) {
        Some(&index) => index,
        None => {
            let index = devices.len();
            indices.insert(name.to_string(), index);
            devices.push(create(name.to_string()));
            index
        }
    };
    &mut devices[index]
}

/// Parses one `BSSID=<dBm>,<freq>,...` token into an access point index
/// and a signal strength.
fn parse_access_point_token(
    token: &str,
    line: &str,
    ap_indices: &mut HashMap<String, usize>,
    bssids: &mut Vec<String>,
) -> Result<(usize, i32)> {
    let (bssid, rest) = token.split_once('=').ok_or_else(|| malformed("BSSID", line))?;
    let dbm = rest.split(',').next().unwrap_or("");
    let strength = parse_i32(dbm, "DBM", line)?;
    Ok((intern(ap_indices, bssids, bssid), strength))
}

// ============================================================================
// PLAIN FORMATS
// ============================================================================

/// Parses signal scan data.
///
/// Line format: `<ts>;<device>;<bssid>=<dBm>,<freq>,<x>,<y>;...`.
/// Broken `pos=` / `id=` tokens are skipped.
pub fn parse_signal_data(input: impl BufRead) -> Result<SignalData> {
    let mut result = SignalData::default();
    let mut ap_indices: HashMap<String, usize> = HashMap::new();
    let mut device_indices: HashMap<String, usize> = HashMap::new();

    for line in input.lines() {
        let line = line?;
        let mut fields = line.split_terminator(';');

        let timestamp = parse_i64(
            fields.next().ok_or_else(|| malformed("TIMESTAMP", &line))?,
            "TIMESTAMP",
            &line,
        )?;
        let device_id = fields.next().ok_or_else(|| malformed("DEVICE_ID", &line))?;

        let device = device_entry(
            &mut device_indices,
            &mut result.devices,
            device_id,
            SignalDevice::new,
        );
        for token in fields {
            // Some lines in the input data are invalid, they look like:
            // 1305645282;B00056;pos=;id=
            if token == "pos=" || token == "id=" {
                continue;
            }
            let (access_point, strength) =
                parse_access_point_token(token, &line, &mut ap_indices, &mut result.bssids)?;
            device.data.push(SignalMeasurement {
                timestamp,
                access_point,
                strength,
            });
        }
    }

    for dev in &mut result.devices {
        dev.data.sort_by_key(|m| m.timestamp);
    }
    Ok(result)
}

/// Parses location fix data.
///
/// Line format:
/// `<ts>;<device>;<lat>;<lng>;<alt>;<uncertainty>;<speed>;<heading>;<vspeed>`.
pub fn parse_location_data(input: impl BufRead) -> Result<LocationData> {
    let mut result = LocationData::default();
    let mut device_indices: HashMap<String, usize> = HashMap::new();

    for line in input.lines() {
        let line = line?;
        let fields: Vec<&str> = line.split_terminator(';').collect();
        if fields.len() < 9 {
            return Err(malformed("9 fields", &line));
        }

        let timestamp = parse_i64(fields[0], "TIMESTAMP", &line)?;
        let device_id = fields[1].to_string();
        let fix = LocationFix {
            timestamp,
            lat: parse_f64(fields[2], "LAT", &line)?,
            lng: parse_f64(fields[3], "LNG", &line)?,
            alt: parse_f64(fields[4], "ALT", &line)?,
            uncertainty: parse_f64(fields[5], "UNCERTAINTY", &line)?,
            speed: parse_f64(fields[6], "SPEED", &line)?,
            heading: parse_f64(fields[7], "HEADING", &line)?,
            vspeed: parse_f64(fields[8], "VSPEED", &line)?,
        };

        device_entry(
            &mut device_indices,
            &mut result.devices,
            &device_id,
            LocationDevice::new,
        )
        .data
        .push(fix);
    }

    for dev in &mut result.devices {
        dev.data.sort_by_key(|m| m.timestamp);
    }
    Ok(result)
}

/// Parses scripted-scene ground truth.
///
/// Line format:
/// `FOLLOWER <n> <readable_start> <readable_end> <start> <end> DEV...`.
/// Space-separated devices get ascending order numbers; devices joined
/// by `,` share one. Every line opens a fresh group. `#` starts a
/// comment line.
pub fn parse_ground_truth_data(input: impl BufRead) -> Result<GroundTruth> {
    let mut result = GroundTruth::default();

    let mut group = 0i32;
    for line in input.lines() {
        let line = line?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() < 6 {
            return Err(malformed("FOLLOWER header", &line));
        }

        if !fields[0].eq_ignore_ascii_case("follower") {
            return Err(Error::MalformedInput(format!(
                "expected a line starting with 'FOLLOWER': {line}"
            )));
        }

        // fields[1..=3] hold the sequence number and the human-readable
        // time range; both are unused.
        let start = parse_i64(fields[4], "START", &line)?;
        let end = parse_i64(fields[5], "END", &line)?;

        let mut devices = Vec::new();
        let mut order = 0i32;
        for &token in &fields[6..] {
            if token.is_empty() || token == "SPACE" {
                continue;
            }
            for name in token.split(',') {
                devices.push(GroundTruthEntry {
                    name: name.to_string(),
                    group,
                    order,
                });
            }
            order += 1;
        }

        for ts in start..=end {
            result
                .timestamps
                .entry(ts)
                .or_default()
                .extend(devices.iter().cloned());
        }
        group += 1;
    }

    Ok(result)
}

// ============================================================================
// GAME FORMATS
// ============================================================================

/// Parses game-experiment signal data.
///
/// A game experiment spreads its scans over one file per device; the
/// files are pushed into the parser one by one. Timestamps are in
/// milliseconds and converted to seconds.
#[derive(Debug, Default)]
pub struct GameSignalParser {
    ap_indices: HashMap<String, usize>,
    device_indices: HashMap<String, usize>,
    result: SignalData,
}

impl GameSignalParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses signal data belonging to the device called `device_id`.
    pub fn parse(&mut self, device_id: &str, input: impl BufRead) -> Result<()> {
        let device = device_entry(
            &mut self.device_indices,
            &mut self.result.devices,
            device_id,
            SignalDevice::new,
        );

        for line in input.lines() {
            let line = line?;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_terminator(';');
            let timestamp = parse_i64(
                fields.next().ok_or_else(|| malformed("TIMESTAMP", &line))?,
                "TIMESTAMP",
                &line,
            )? / 1000;

            let file_device = fields.next().ok_or_else(|| malformed("DEVICE_ID", &line))?;
            debug_assert_eq!(file_device, device_id, "one device per file");

            for token in fields {
                let (access_point, strength) = parse_access_point_token(
                    token,
                    &line,
                    &mut self.ap_indices,
                    &mut self.result.bssids,
                )?;
                device.data.push(SignalMeasurement {
                    timestamp,
                    access_point,
                    strength,
                });
            }
        }
        Ok(())
    }

    /// Returns all data parsed so far and resets the parser.
    pub fn finish(&mut self) -> SignalData {
        let mut data = std::mem::take(&mut self.result);
        self.ap_indices.clear();
        self.device_indices.clear();

        for dev in &mut data.devices {
            dev.data.sort_by_key(|m| m.timestamp);
        }
        data
    }
}

/// Parses game follow-event files into ground truth.
///
/// Every device file lists `<ms_ts>;<evader_id_or_-1>` transitions. The
/// parser keeps a "currently following evader X" state: each contiguous
/// range `[last_ts, next_ts)` puts the device into the evader's group at
/// order 1, or into its own fresh group at order 0 while it moves free.
#[derive(Debug)]
pub struct GameGroundTruthParser {
    evaders: HashMap<String, i32>,
    next_id: i32,
    begin: i64,
    end: i64,
    result: GroundTruth,
}

impl GameGroundTruthParser {
    /// Creates a parser for the evader map and the experiment range
    /// (both timestamps inclusive).
    ///
    /// Every evader occupies its configured group, at order 0, for the
    /// whole experiment.
    pub fn new(evaders: &HashMap<String, i32>, begin: i64, end: i64) -> Result<Self> {
        if begin > end {
            return Err(Error::InvalidParameters(
                "begin timestamp must be <= end timestamp".into(),
            ));
        }

        let mut result = GroundTruth::default();
        let mut seen_ids = HashSet::new();
        let mut next_id = 0i32;
        for (device_id, &evader_id) in evaders {
            if !seen_ids.insert(evader_id) {
                return Err(Error::InvalidParameters(format!(
                    "duplicate evader id: {evader_id}"
                )));
            }
            // Ids above all evader groups are free for devices that
            // move alone.
            next_id = next_id.max(evader_id + 1);

            for ts in begin..=end {
                result
                    .timestamps
                    .entry(ts)
                    .or_default()
                    .push(GroundTruthEntry {
                        name: device_id.clone(),
                        group: evader_id,
                        order: 0,
                    });
            }
        }

        Ok(Self {
            evaders: evaders.clone(),
            next_id,
            begin,
            end,
            result,
        })
    }

    /// Parses the follow events of the device called `device_id`.
    pub fn parse(&mut self, device_id: &str, input: impl BufRead) -> Result<()> {
        let unique_id = self.next_id;
        self.next_id += 1;

        if self.evaders.contains_key(device_id) {
            // The ground truth of an evader is fixed up front.
            return Ok(());
        }

        let mut last_timestamp = self.begin;
        let mut last_evader = -1i32;
        for line in input.lines() {
            let line = line?;
            let mut fields = line.split_terminator(';');

            let first = fields.next().ok_or_else(|| malformed("TIMESTAMP", &line))?;
            if first == "timestamp" {
                // Header line of a followevent file.
                continue;
            }

            let timestamp = parse_i64(first, "TIMESTAMP", &line)? / 1000;
            if timestamp < self.begin {
                continue;
            }
            if timestamp > self.end {
                break;
            }

            let evader_id = parse_i32(
                fields.next().ok_or_else(|| malformed("EVADER_ID", &line))?,
                "EVADER_ID",
                &line,
            )?;

            if last_timestamp > timestamp {
                return Err(Error::MalformedInput(
                    "timestamps must be sorted (ascending)".into(),
                ));
            }

            self.emit(device_id, unique_id, last_evader, last_timestamp, timestamp - 1);
            last_timestamp = timestamp;
            last_evader = evader_id;
        }

        self.emit(device_id, unique_id, last_evader, last_timestamp, self.end);
        Ok(())
    }

    /// Attributes `[from, to]` to the evader's group (order 1) or to the
    /// device's own group (order 0) when it follows nobody.
    fn emit(&mut self, device_id: &str, unique_id: i32, evader: i32, from: i64, to: i64) {
        let (group, order) = if evader != -1 {
            (evader, 1)
        } else {
            (unique_id, 0)
        };

        for ts in from..=to {
            self.result
                .timestamps
                .entry(ts)
                .or_default()
                .push(GroundTruthEntry {
                    name: device_id.to_string(),
                    group,
                    order,
                });
        }
    }

    /// Returns the ground truth parsed so far and resets the parser.
    pub fn finish(&mut self) -> GroundTruth {
        std::mem::take(&mut self.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement(timestamp: i64, access_point: usize, strength: i32) -> SignalMeasurement {
        SignalMeasurement {
            timestamp,
            access_point,
            strength,
        }
    }

    fn entry(name: &str, group: i32, order: i32) -> GroundTruthEntry {
        GroundTruthEntry {
            name: name.into(),
            group,
            order,
        }
    }

    #[test]
    fn parses_signal_strength_lines() {
        let input = "123456;DEVICE_1;AP_1=-50,2400,ignore,ignore;AP_2=-60,2442,ignore,ignore\n\
                     123457;DEVICE_1;AP_1=-50,2400,ignore,ignore;AP_3=-80,2442,ignore,ignore\n\
                     123457;DEVICE_2;AP_1=-55,2400,ignore,ignore\n\
                     123454;DEVICE_2;AP_1=-54,2400,ignore,ignore\n";
        let data = parse_signal_data(input.as_bytes()).unwrap();

        assert_eq!(data.bssids, vec!["AP_1", "AP_2", "AP_3"]);
        assert_eq!(data.devices.len(), 2);

        assert_eq!(data.devices[0].name, "DEVICE_1");
        assert_eq!(
            data.devices[0].data,
            vec![
                measurement(123456, 0, -50),
                measurement(123456, 1, -60),
                measurement(123457, 0, -50),
                measurement(123457, 2, -80),
            ]
        );

        // Entries are sorted by timestamp after ingest.
        assert_eq!(data.devices[1].name, "DEVICE_2");
        assert_eq!(
            data.devices[1].data,
            vec![measurement(123454, 0, -54), measurement(123457, 0, -55)]
        );
    }

    #[test]
    fn skips_broken_pos_and_id_tokens() {
        let input = "1305645282;B00056;pos=;id=\n";
        let data = parse_signal_data(input.as_bytes()).unwrap();
        assert_eq!(data.devices.len(), 1);
        assert!(data.devices[0].data.is_empty());
        assert!(data.bssids.is_empty());
    }

    #[test]
    fn rejects_malformed_signal_lines() {
        assert!(parse_signal_data("not-a-number;DEV;AP=-50,1,,\n".as_bytes()).is_err());
        assert!(parse_signal_data("123\n".as_bytes()).is_err());
        assert!(parse_signal_data("123;DEV;AP_MISSING_VALUE\n".as_bytes()).is_err());
    }

    #[test]
    fn parses_location_lines() {
        let input = "100;DEVICE_A;1;4;7;1;2;3;4\n\
                     101;DEVICE_B;2;5;8;2;3;4;5\n\
                     100;DEVICE_B;3;6;9;6;7;8;9\n";
        let data = parse_location_data(input.as_bytes()).unwrap();

        assert_eq!(data.devices.len(), 2);
        assert_eq!(data.devices[0].name, "DEVICE_A");
        assert_eq!(
            data.devices[0].data,
            vec![LocationFix {
                timestamp: 100,
                lat: 1.0,
                lng: 4.0,
                alt: 7.0,
                uncertainty: 1.0,
                speed: 2.0,
                heading: 3.0,
                vspeed: 4.0,
            }]
        );

        // DEVICE_B's fixes arrive out of order and get sorted.
        assert_eq!(data.devices[1].name, "DEVICE_B");
        assert_eq!(
            data.devices[1].data,
            vec![
                LocationFix {
                    timestamp: 100,
                    lat: 3.0,
                    lng: 6.0,
                    alt: 9.0,
                    uncertainty: 6.0,
                    speed: 7.0,
                    heading: 8.0,
                    vspeed: 9.0,
                },
                LocationFix {
                    timestamp: 101,
                    lat: 2.0,
                    lng: 5.0,
                    alt: 8.0,
                    uncertainty: 2.0,
                    speed: 3.0,
                    heading: 4.0,
                    vspeed: 5.0,
                },
            ]
        );
    }

    #[test]
    fn parses_ground_truth_lines() {
        let input = "Follower 3 TIME_1 TIME_2 1 4 DEV_A DEV_B DEV_C\n\
                     # Comments are ignored\n\
                     Follower 3 TIME_1 TIME_2 2 5 DEV_D DEV_E,DEV_F\n";
        let gt = parse_ground_truth_data(input.as_bytes()).unwrap();

        let first = vec![
            entry("DEV_A", 0, 0),
            entry("DEV_B", 0, 1),
            entry("DEV_C", 0, 2),
        ];
        let second = vec![
            entry("DEV_D", 1, 0),
            entry("DEV_E", 1, 1),
            entry("DEV_F", 1, 1),
        ];
        let both: Vec<_> = first.iter().chain(&second).cloned().collect();

        assert_eq!(gt.timestamps.first_key_value().map(|(k, _)| *k), Some(1));
        assert_eq!(gt.timestamps.last_key_value().map(|(k, _)| *k), Some(5));

        assert_eq!(gt.timestamps[&1], first);
        assert_eq!(gt.timestamps[&2], both);
        assert_eq!(gt.timestamps[&3], both);
        assert_eq!(gt.timestamps[&4], both);
        assert_eq!(gt.timestamps[&5], second);
    }

    #[test]
    fn ground_truth_requires_follower_keyword() {
        let input = "LEADER 3 A B 1 4 DEV_A\n";
        assert!(parse_ground_truth_data(input.as_bytes()).is_err());
    }

    #[test]
    fn parses_game_signal_files() {
        let input1 = "1331133709724;DEV_1;AP_1=-80,2412,,;AP_2=-81,2462,,;\n\
                      1331133711510;DEV_1;AP_1=-68,2412,,;AP_3=-76,2462,,;\n\
                      1331133714004;DEV_1;AP_1=-70,2412,,;AP_3=-76,2462,,;\n";
        let input2 = "1331133630203;DEV_2;AP_4=-47,2412,,;AP_5=-67,2437,,;\n";

        let mut parser = GameSignalParser::new();
        parser.parse("DEV_1", input1.as_bytes()).unwrap();
        parser.parse("DEV_2", input2.as_bytes()).unwrap();
        let data = parser.finish();

        assert_eq!(data.bssids, vec!["AP_1", "AP_2", "AP_3", "AP_4", "AP_5"]);
        assert_eq!(data.devices.len(), 2);
        assert_eq!(
            data.devices[0].data,
            vec![
                measurement(1331133709, 0, -80),
                measurement(1331133709, 1, -81),
                measurement(1331133711, 0, -68),
                measurement(1331133711, 2, -76),
                measurement(1331133714, 0, -70),
                measurement(1331133714, 2, -76),
            ]
        );
        assert_eq!(
            data.devices[1].data,
            vec![measurement(1331133630, 3, -47), measurement(1331133630, 4, -67)]
        );
    }

    #[test]
    fn parses_game_ground_truth_files() {
        use std::collections::BTreeSet;

        let input1 = "1000;1\n5000;2\n6000;-1\n";
        let input2 = "2000;2\n3000;-1\n4000;1\n";

        let evaders = HashMap::from([("EV_1".to_string(), 1), ("EV_2".to_string(), 2)]);
        let mut parser = GameGroundTruthParser::new(&evaders, 1, 6).unwrap();
        parser.parse("DEV_1", input1.as_bytes()).unwrap();
        parser.parse("DEV_2", input2.as_bytes()).unwrap();
        let gt = parser.finish();

        let expected: [&[(&str, i32, i32)]; 6] = [
            &[("EV_1", 1, 0), ("EV_2", 2, 0), ("DEV_1", 1, 1), ("DEV_2", 4, 0)],
            &[("EV_1", 1, 0), ("EV_2", 2, 0), ("DEV_1", 1, 1), ("DEV_2", 2, 1)],
            &[("EV_1", 1, 0), ("EV_2", 2, 0), ("DEV_1", 1, 1), ("DEV_2", 4, 0)],
            &[("EV_1", 1, 0), ("EV_2", 2, 0), ("DEV_1", 1, 1), ("DEV_2", 1, 1)],
            &[("EV_1", 1, 0), ("EV_2", 2, 0), ("DEV_1", 2, 1), ("DEV_2", 1, 1)],
            &[("EV_1", 1, 0), ("EV_2", 2, 0), ("DEV_1", 3, 0), ("DEV_2", 1, 1)],
        ];

        for (offset, expected_entries) in expected.iter().enumerate() {
            let ts = offset as i64 + 1;
            let got: BTreeSet<(String, i32, i32)> = gt.timestamps[&ts]
                .iter()
                .map(|e| (e.name.clone(), e.group, e.order))
                .collect();
            let want: BTreeSet<(String, i32, i32)> = expected_entries
                .iter()
                .map(|&(name, group, order)| (name.to_string(), group, order))
                .collect();
            assert_eq!(got, want, "at timestamp {ts}");
        }
    }

    #[test]
    fn game_ground_truth_header_lines_are_skipped() {
        let evaders = HashMap::from([("EV_1".to_string(), 1)]);
        let mut parser = GameGroundTruthParser::new(&evaders, 0, 2).unwrap();
        parser
            .parse("DEV_1", "timestamp;evader\n1000;1\n".as_bytes())
            .unwrap();
        let gt = parser.finish();

        // [0, 0] free, [1, 2] following evader 1.
        let find = |ts: i64, name: &str| {
            gt.timestamps[&ts]
                .iter()
                .find(|e| e.name == name)
                .cloned()
                .unwrap()
        };
        assert_eq!(find(0, "DEV_1"), entry("DEV_1", 2, 0));
        assert_eq!(find(1, "DEV_1"), entry("DEV_1", 1, 1));
        assert_eq!(find(2, "DEV_1"), entry("DEV_1", 1, 1));
    }

    #[test]
    fn game_ground_truth_rejects_duplicate_evader_ids() {
        let evaders = HashMap::from([("EV_1".to_string(), 1), ("EV_2".to_string(), 1)]);
        assert!(GameGroundTruthParser::new(&evaders, 0, 5).is_err());
    }

    #[test]
    fn game_ground_truth_rejects_unsorted_events() {
        let evaders = HashMap::from([("EV_1".to_string(), 1)]);
        let mut parser = GameGroundTruthParser::new(&evaders, 0, 10).unwrap();
        let result = parser.parse("DEV_1", "5000;1\n3000;-1\n".as_bytes());
        assert!(matches!(result, Err(Error::MalformedInput(_))));
    }
}
