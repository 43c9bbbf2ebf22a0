//! Dense per-second tracing data.
//!
//! Tracing data is an abstraction over both signal and location data.
//! For every device it stores a matrix with `duration` rows and
//! `data_dimension` columns; every row holds the measurements (signal
//! strengths or spatial coordinates) for one second.

use crate::array2d::Array2;
use crate::error::{Error, Result};
use crate::location::LocationData;
use crate::signal::SignalData;

/// The dense trace of a single device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTrace {
    /// Unique device name.
    pub name: String,

    /// One row per time step, `data_dimension` columns.
    pub data: Array2<f64>,

    /// Same dimensions as `data`. A cell is 1 iff the matching data cell
    /// came from a real measurement and 0 iff it holds a default value or
    /// was forward-copied from the previous time step. For signal-derived
    /// traces a 0 means the access point was not seen at that second.
    pub has_data: Array2<u8>,
}

/// Dense per-second traces for all devices over a shared time range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TracingData {
    /// Number of scalar values per time step: one per access point for
    /// signal data, three (lat/lng/alt) for location data.
    pub data_dimension: usize,

    /// First timestamp.
    pub min_timestamp: i64,
    /// Last timestamp (inclusive).
    pub max_timestamp: i64,
    /// `max - min + 1` seconds.
    pub duration: i64,

    pub devices: Vec<DeviceTrace>,
}

impl TracingData {
    /// The data row for the given device at the given timestamp.
    pub fn data_at<'a>(&self, device: &'a DeviceTrace, timestamp: i64) -> &'a [f64] {
        assert!(
            timestamp >= self.min_timestamp && timestamp <= self.max_timestamp,
            "timestamp in range"
        );
        device.data.row((timestamp - self.min_timestamp) as usize)
    }

    /// The has-data row for the given device at the given timestamp.
    pub fn has_data_at<'a>(&self, device: &'a DeviceTrace, timestamp: i64) -> &'a [u8] {
        assert!(
            timestamp >= self.min_timestamp && timestamp <= self.max_timestamp,
            "timestamp in range"
        );
        device
            .has_data
            .row((timestamp - self.min_timestamp) as usize)
    }

    /// The list of unique device index pairs `(i, j)` with `i < j`.
    pub fn unique_pairs(&self) -> Vec<(usize, usize)> {
        let n = self.devices.len();
        let mut result = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                result.push((i, j));
            }
        }
        result
    }

    /// Keeps only devices for which `keep` returns true.
    pub fn retain_devices<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.devices.retain(|dev| keep(&dev.name));
    }

    /// Builds tracing data from signal measurements.
    ///
    /// Missing access-point readings are filled with
    /// `default_signal_strength` (maximum distance is assumed); seconds
    /// without any measurement repeat the previous row, assuming the
    /// device did not move.
    pub fn from_signal(sd: &SignalData, default_signal_strength: i32) -> Result<Self> {
        if sd.devices.is_empty() {
            return Err(Error::EmptyInput("no devices"));
        }
        let num_access_points = sd.bssids.len();
        if num_access_points == 0 {
            return Err(Error::EmptyInput("no access points"));
        }

        let (min_timestamp, max_timestamp) = timestamp_bounds(
            sd.devices
                .iter()
                .flat_map(|dev| dev.data.iter().map(|m| m.timestamp)),
        )?;
        let duration = max_timestamp - min_timestamp + 1;
        let default_value = f64::from(default_signal_strength);

        let mut result = TracingData {
            data_dimension: num_access_points,
            min_timestamp,
            max_timestamp,
            duration,
            devices: Vec::with_capacity(sd.devices.len()),
        };

        // Number of measurements per access point in the current row,
        // used to average duplicates on row finalization.
        let mut seen = vec![0u32; num_access_points];

        for dev in &sd.devices {
            let mut data = Array2::filled(duration as usize, num_access_points, 0.0);
            let mut has_data = Array2::filled(duration as usize, num_access_points, 0u8);

            let mut entries = dev.data.iter().peekable();
            for ts in min_timestamp..=max_timestamp {
                let row_index = (ts - min_timestamp) as usize;

                let mut have_entries = false;
                while let Some(entry) = entries.peek().copied() {
                    debug_assert!(entry.timestamp >= ts, "entries are sorted");
                    if entry.timestamp != ts {
                        break;
                    }
                    seen[entry.access_point] += 1;
                    data.row_mut(row_index)[entry.access_point] += f64::from(entry.strength);
                    have_entries = true;
                    entries.next();
                }

                if !have_entries {
                    // No entry for the current second. Assume the device
                    // has not moved: repeat the previous row, or take the
                    // default at the very first timestamp.
                    if ts > min_timestamp {
                        copy_row(&mut data, row_index);
                        copy_row(&mut has_data, row_index);
                    } else {
                        data.row_mut(row_index).fill(default_value);
                    }
                    continue;
                }

                // Finalize: average seen access points, default the rest.
                let row = data.row_mut(row_index);
                let flags = has_data.row_mut(row_index);
                for ap in 0..num_access_points {
                    if seen[ap] == 0 {
                        row[ap] = default_value;
                    } else {
                        row[ap] /= f64::from(seen[ap]);
                        flags[ap] = 1;
                    }
                    seen[ap] = 0;
                }
            }
            debug_assert!(entries.next().is_none(), "must have consumed all entries");

            result.devices.push(DeviceTrace {
                name: dev.name.clone(),
                data,
                has_data,
            });
        }

        Ok(result)
    }

    /// Builds tracing data from location fixes.
    ///
    /// All three coordinates are present in every fix, so the has-data
    /// matrix is all ones. Seconds without a fix repeat the previous row;
    /// a missing fix at the very first second falls back to the origin.
    pub fn from_location(ld: &LocationData) -> Result<Self> {
        if ld.devices.is_empty() {
            return Err(Error::EmptyInput("no devices"));
        }

        let (min_timestamp, max_timestamp) = timestamp_bounds(
            ld.devices
                .iter()
                .flat_map(|dev| dev.data.iter().map(|m| m.timestamp)),
        )?;
        let duration = max_timestamp - min_timestamp + 1;

        let mut result = TracingData {
            data_dimension: 3,
            min_timestamp,
            max_timestamp,
            duration,
            devices: Vec::with_capacity(ld.devices.len()),
        };

        for dev in &ld.devices {
            let mut data = Array2::filled(duration as usize, 3, 0.0);
            let has_data = Array2::filled(duration as usize, 3, 1u8);

            let mut entries = dev.data.iter().peekable();
            for ts in min_timestamp..=max_timestamp {
                let row_index = (ts - min_timestamp) as usize;

                let mut count = 0u32;
                while let Some(entry) = entries.peek().copied() {
                    debug_assert!(entry.timestamp >= ts, "entries are sorted");
                    if entry.timestamp != ts {
                        break;
                    }
                    let row = data.row_mut(row_index);
                    row[0] += entry.lat;
                    row[1] += entry.lng;
                    row[2] += entry.alt;
                    count += 1;
                    entries.next();
                }

                if count == 0 {
                    if ts > min_timestamp {
                        copy_row(&mut data, row_index);
                    }
                    // At the first timestamp the row stays at the origin.
                } else if count > 1 {
                    for value in data.row_mut(row_index) {
                        *value /= f64::from(count);
                    }
                }
            }
            debug_assert!(entries.next().is_none(), "must have consumed all entries");

            result.devices.push(DeviceTrace {
                name: dev.name.clone(),
                data,
                has_data,
            });
        }

        Ok(result)
    }

    /// Replaces every cell with the moving average of up to the `n` most
    /// recent rows of its column (fewer near the start). Columns are
    /// independent; the has-data matrix is untouched.
    pub fn moving_average(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Err(Error::InvalidParameters(
                "moving average window must be positive".into(),
            ));
        }

        for dev in &mut self.devices {
            let rows = dev.data.rows();
            let columns = dev.data.columns();
            let mut smoothed = Array2::filled(rows, columns, 0.0);

            for row in 0..rows {
                let first_row = row.saturating_sub(n - 1);
                let num = (row - first_row + 1) as f64;
                for column in 0..columns {
                    let mut acc = 0.0;
                    for i in first_row..=row {
                        acc += *dev.data.cell(i, column);
                    }
                    *smoothed.cell_mut(row, column) = acc / num;
                }
            }

            dev.data = smoothed;
        }
        Ok(())
    }
}

/// Scans all measurement timestamps for their minimum and maximum.
fn timestamp_bounds(timestamps: impl Iterator<Item = i64>) -> Result<(i64, i64)> {
    let mut min = i64::MAX;
    let mut max = i64::MIN;
    for ts in timestamps {
        min = min.min(ts);
        max = max.max(ts);
    }
    if max < min {
        return Err(Error::EmptyInput("requires at least one measurement"));
    }
    Ok((min, max))
}

/// Copies row `index - 1` into row `index`.
fn copy_row<T: Copy + Default>(array: &mut Array2<T>, index: usize) {
    debug_assert!(index > 0);
    for column in 0..array.columns() {
        let previous = *array.cell(index - 1, column);
        *array.cell_mut(index, column) = previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{SignalDevice, SignalMeasurement};

    fn measurement(timestamp: i64, access_point: usize, strength: i32) -> SignalMeasurement {
        SignalMeasurement {
            timestamp,
            access_point,
            strength,
        }
    }

    #[test]
    fn unique_pairs() {
        let mut td = TracingData::default();
        for name in ["dev0", "dev1", "dev2"] {
            td.devices.push(DeviceTrace {
                name: name.into(),
                data: Array2::default(),
                has_data: Array2::default(),
            });
        }
        assert_eq!(td.unique_pairs(), vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn transforms_signal_data() {
        let sd = SignalData {
            bssids: vec!["AP_1".into(), "AP_2".into(), "AP_3".into()],
            devices: vec![
                SignalDevice {
                    name: "DEV_1".into(),
                    data: vec![
                        measurement(1, 0, -50),
                        measurement(1, 1, -60),
                        measurement(1, 0, -48),
                        // No measurement for AP_3, none for timestamp 2.
                    ],
                },
                SignalDevice {
                    name: "DEV_2".into(),
                    data: vec![
                        measurement(1, 2, -42),
                        measurement(1, 1, -46),
                        measurement(2, 2, -41),
                        measurement(2, 1, -48),
                        // No measurement for AP_1.
                    ],
                },
            ],
        };

        let result = TracingData::from_signal(&sd, -90).unwrap();

        assert_eq!(result.data_dimension, 3);
        assert_eq!(result.min_timestamp, 1);
        assert_eq!(result.max_timestamp, 2);
        assert_eq!(result.duration, 2);
        assert_eq!(result.devices.len(), 2);

        // DEV_1: duplicate AP_1 readings are averaged, AP_3 takes the
        // default, the second row is forward-copied.
        let dev1 = &result.devices[0];
        assert_eq!(dev1.data.row(0), &[-49.0, -60.0, -90.0]);
        assert_eq!(dev1.data.row(1), &[-49.0, -60.0, -90.0]);
        assert_eq!(dev1.has_data.row(0), &[1, 1, 0]);
        assert_eq!(dev1.has_data.row(1), &[1, 1, 0]);

        let dev2 = &result.devices[1];
        assert_eq!(dev2.data.row(0), &[-90.0, -46.0, -42.0]);
        assert_eq!(dev2.data.row(1), &[-90.0, -48.0, -41.0]);
        assert_eq!(dev2.has_data.row(0), &[0, 1, 1]);
        assert_eq!(dev2.has_data.row(1), &[0, 1, 1]);
    }

    #[test]
    fn signal_transform_rejects_empty_input() {
        let empty = SignalData::default();
        assert!(matches!(
            TracingData::from_signal(&empty, -90),
            Err(Error::EmptyInput("no devices"))
        ));

        let no_aps = SignalData {
            bssids: vec![],
            devices: vec![SignalDevice::new("DEV_1")],
        };
        assert!(matches!(
            TracingData::from_signal(&no_aps, -90),
            Err(Error::EmptyInput("no access points"))
        ));

        let no_measurements = SignalData {
            bssids: vec!["AP_1".into()],
            devices: vec![SignalDevice::new("DEV_1")],
        };
        assert!(matches!(
            TracingData::from_signal(&no_measurements, -90),
            Err(Error::EmptyInput(_))
        ));
    }

    #[test]
    fn transforms_location_data() {
        use crate::location::{LocationDevice, LocationFix};

        let fix = |timestamp, lat, lng, alt| LocationFix {
            timestamp,
            lat,
            lng,
            alt,
            uncertainty: 1.0,
            speed: 0.0,
            heading: 0.0,
            vspeed: 0.0,
        };

        let ld = LocationData {
            devices: vec![LocationDevice {
                name: "DEV_1".into(),
                data: vec![
                    fix(10, 1.0, 2.0, 3.0),
                    fix(10, 3.0, 4.0, 5.0),
                    // Nothing at 11.
                    fix(12, 9.0, 9.0, 9.0),
                ],
            }],
        };

        let result = TracingData::from_location(&ld).unwrap();
        assert_eq!(result.data_dimension, 3);
        assert_eq!(result.duration, 3);

        let dev = &result.devices[0];
        // Two fixes at t=10 are averaged coordinate-wise.
        assert_eq!(dev.data.row(0), &[2.0, 3.0, 4.0]);
        // t=11 repeats t=10.
        assert_eq!(dev.data.row(1), &[2.0, 3.0, 4.0]);
        assert_eq!(dev.data.row(2), &[9.0, 9.0, 9.0]);
        // Location masks are always 1.
        assert!(dev.has_data.iter().all(|&flag| flag == 1));
    }

    #[test]
    fn moving_average_smooths_columns() {
        let sd = SignalData {
            bssids: vec!["AP_1".into()],
            devices: vec![SignalDevice {
                name: "DEV_1".into(),
                data: vec![
                    measurement(0, 0, -10),
                    measurement(1, 0, -20),
                    measurement(2, 0, -30),
                    measurement(3, 0, -40),
                ],
            }],
        };

        let mut td = TracingData::from_signal(&sd, -90).unwrap();
        td.moving_average(2).unwrap();

        let dev = &td.devices[0];
        assert_eq!(dev.data.row(0), &[-10.0]);
        assert_eq!(dev.data.row(1), &[-15.0]);
        assert_eq!(dev.data.row(2), &[-25.0]);
        assert_eq!(dev.data.row(3), &[-35.0]);
        // The mask is untouched.
        assert!(dev.has_data.iter().all(|&flag| flag == 1));
    }

    #[test]
    fn moving_average_rejects_empty_window() {
        let mut td = TracingData::default();
        assert!(td.moving_average(0).is_err());
    }

    #[test]
    fn retain_devices_filters_by_name() {
        let mut td = TracingData::default();
        for name in ["a", "b", "c"] {
            td.devices.push(DeviceTrace {
                name: name.into(),
                data: Array2::default(),
                has_data: Array2::default(),
            });
        }
        td.retain_devices(|name| name != "b");
        let names: Vec<_> = td.devices.iter().map(|dev| dev.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
