//! Raw WiFi signal-strength measurements.
//!
//! For each known device this structure holds a vector of measurements.
//! A measurement records the signal strength of one access point at one
//! point in time.

/// A single signal-strength measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalMeasurement {
    /// Unix timestamp, seconds.
    pub timestamp: i64,
    /// Index into [`SignalData::bssids`].
    pub access_point: usize,
    /// Signal strength in dBm.
    pub strength: i32,
}

/// All measurements of a single device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalDevice {
    /// Unique device identifier.
    pub name: String,
    /// Sorted by timestamp, ascending. Multiple measurements per access
    /// point and timestamp are possible, as are missing values.
    pub data: Vec<SignalMeasurement>,
}

impl SignalDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Vec::new(),
        }
    }
}

/// Signal-strength measurements of all devices against all access points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalData {
    /// Names (BSSIDs) of the known access points.
    pub bssids: Vec<String>,
    pub devices: Vec<SignalDevice>,
}

/// Finds access points whose average signal strength across all devices
/// is below `minimum_average` dBm. Access points without any measurement
/// count as bad, too. The returned indices are ascending.
pub fn bad_access_points(sd: &SignalData, minimum_average: f64) -> Vec<usize> {
    let num_aps = sd.bssids.len();

    let mut count = vec![0i64; num_aps];
    let mut total = vec![0.0f64; num_aps];
    for dev in &sd.devices {
        for measurement in &dev.data {
            total[measurement.access_point] += f64::from(measurement.strength);
            count[measurement.access_point] += 1;
        }
    }

    (0..num_aps)
        .filter(|&ap| count[ap] == 0 || total[ap] / (count[ap] as f64) < minimum_average)
        .collect()
}

/// Removes the given access points and all of their measurements.
///
/// Surviving access points are renumbered densely from zero and the
/// remaining measurements are rewritten to point at the new indices.
/// The indices in `access_point_ids` must be valid for `sd.bssids`.
pub fn remove_access_points(sd: &mut SignalData, access_point_ids: &[usize]) {
    let num_aps = sd.bssids.len();
    debug_assert!(access_point_ids.iter().all(|&id| id < num_aps));

    let removed = |ap: usize| access_point_ids.contains(&ap);

    for dev in &mut sd.devices {
        dev.data.retain(|measurement| !removed(measurement.access_point));
    }

    // Build the new name vector and the old -> new index mapping.
    let mut new_bssids = Vec::with_capacity(num_aps - access_point_ids.len());
    let mut index_map = vec![usize::MAX; num_aps];
    for (ap, bssid) in std::mem::take(&mut sd.bssids).into_iter().enumerate() {
        if !removed(ap) {
            index_map[ap] = new_bssids.len();
            new_bssids.push(bssid);
        }
    }
    sd.bssids = new_bssids;

    for dev in &mut sd.devices {
        for measurement in &mut dev.data {
            measurement.access_point = index_map[measurement.access_point];
            debug_assert_ne!(measurement.access_point, usize::MAX);
        }
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

    fn sample_data() -> SignalData {
        SignalData {
            bssids: vec!["A".into(), "B".into(), "C".into()],
            devices: vec![
                SignalDevice {
                    name: "DEV_1".into(),
                    data: vec![
                        measurement(0, 0, -50),
                        measurement(0, 1, -60),
                        measurement(1, 1, -70),
                        measurement(1, 2, -80),
                    ],
                },
                SignalDevice {
                    name: "DEV_2".into(),
                    data: vec![
                        measurement(0, 1, -30),
                        measurement(0, 2, -40),
                        measurement(1, 1, -40),
                        measurement(1, 0, -100),
                    ],
                },
            ],
        }
    }

    #[test]
    fn bad_access_points_are_recognized() {
        // Averages: ap 0 -> -75, ap 1 -> -50, ap 2 -> -60.
        let sd = sample_data();

        assert_eq!(bad_access_points(&sd, -74.0), vec![0]);
        assert_eq!(bad_access_points(&sd, -75.0), Vec::<usize>::new());
        assert_eq!(bad_access_points(&sd, -51.0), vec![0, 2]);
    }

    #[test]
    fn access_point_without_measurements_is_bad() {
        let mut sd = sample_data();
        sd.bssids.push("D".into());
        assert_eq!(bad_access_points(&sd, -1000.0), vec![3]);
    }

    #[test]
    fn removing_no_access_points_changes_nothing() {
        let mut sd = sample_data();
        let copy = sd.clone();
        remove_access_points(&mut sd, &[]);
        assert_eq!(sd, copy);
    }

    #[test]
    fn removing_access_point_at_end() {
        let mut sd = sample_data();
        remove_access_points(&mut sd, &[2]);

        assert_eq!(sd.bssids, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(
            sd.devices[0].data,
            vec![
                measurement(0, 0, -50),
                measurement(0, 1, -60),
                measurement(1, 1, -70),
            ]
        );
        assert_eq!(
            sd.devices[1].data,
            vec![
                measurement(0, 1, -30),
                measurement(1, 1, -40),
                measurement(1, 0, -100),
            ]
        );
    }

    #[test]
    fn removing_access_points_renumbers_survivors() {
        let mut sd = sample_data();
        remove_access_points(&mut sd, &[0, 2]);

        assert_eq!(sd.bssids, vec!["B".to_string()]);
        assert_eq!(
            sd.devices[0].data,
            vec![measurement(0, 0, -60), measurement(1, 0, -70)]
        );
        assert_eq!(
            sd.devices[1].data,
            vec![measurement(0, 0, -30), measurement(1, 0, -40)]
        );
    }

    #[test]
    fn removing_all_access_points() {
        let mut sd = sample_data();
        remove_access_points(&mut sd, &[2, 1, 0]);

        assert!(sd.bssids.is_empty());
        assert!(sd.devices.iter().all(|dev| dev.data.is_empty()));
    }
}
