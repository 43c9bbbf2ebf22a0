//! Following detection: time-lag estimation and per-timestamp relations.

use serde::{Deserialize, Serialize};

use crate::classifier::CoMovingClassifier;
use crate::error::{Error, Result};
use crate::features::SimilarityData;

/// The type of a detected following relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowingType {
    /// The first device follows the second one.
    Following,
    /// The first device leads the second one.
    Leading,
    /// They move next to each other.
    CoLeading,
}

/// Estimates the effective time lag of a co-moving pair from its
/// feature vector of `2 * time_lag + 1` similarity values.
#[derive(Debug, Clone, Copy)]
pub struct TimeLagEstimation {
    min_lag: i64,
    size: usize,
}

impl TimeLagEstimation {
    /// Estimated lags with `|lag| <= 0.1` count as co-leading.
    const CO_LEADING_THRESHOLD: f64 = 0.1;

    pub fn new(time_lag: usize) -> Self {
        Self {
            min_lag: -(time_lag as i64),
            size: time_lag * 2 + 1,
        }
    }

    /// The lag whose similarity value has the smallest absolute value
    /// (the first one on ties).
    pub fn estimate_lag_simple(&self, feature: &[f64]) -> f64 {
        assert_eq!(feature.len(), self.size, "feature vector length");

        let mut min_index = 0;
        for (index, value) in feature.iter().enumerate() {
            if value.abs() < feature[min_index].abs() {
                min_index = index;
            }
        }
        self.min_lag as f64 + min_index as f64
    }

    /// A weighted average over all lags, where each lag contributes with
    /// the reciprocal of its similarity value. Values are clamped away
    /// from zero (sign-preserving) to keep the reciprocals finite.
    pub fn estimate_lag_complex(&self, feature: &[f64]) -> f64 {
        const MIN_SIMILARITY: f64 = 0.001;

        assert_eq!(feature.len(), self.size, "feature vector length");

        let mut weighted_sum = 0.0;
        let mut norm = 0.0;
        let mut lag = self.min_lag;
        for &similarity in feature {
            let similarity = if similarity.abs() < MIN_SIMILARITY {
                if similarity < 0.0 {
                    -MIN_SIMILARITY
                } else {
                    MIN_SIMILARITY
                }
            } else {
                similarity
            };

            let inverse = 1.0 / similarity;
            norm += inverse;
            weighted_sum += lag as f64 * inverse;
            lag += 1;
        }

        weighted_sum / norm
    }

    /// Maps an estimated lag to a following type.
    pub fn following_type(&self, estimated_lag: f64) -> FollowingType {
        if estimated_lag.abs() <= Self::CO_LEADING_THRESHOLD {
            FollowingType::CoLeading
        } else if estimated_lag < 0.0 {
            FollowingType::Following
        } else {
            FollowingType::Leading
        }
    }
}

/// A pair that has been classified as co-moving.
///
/// For `following`, `left` is following `right`; for `leading`, `left`
/// is leading `right`; for `co_leading` both devices lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowingPair {
    /// Index into [`FollowingData::devices`].
    pub left: usize,
    /// Same.
    pub right: usize,
    /// Estimated time lag.
    pub lag: f64,
    #[serde(rename = "type")]
    pub kind: FollowingType,
}

/// All co-moving pairs of a single timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FollowingTimestamp {
    pub timestamp: i64,
    pub co_moving: Vec<FollowingPair>,
}

/// Every detected following relation for every timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FollowingData {
    pub begin_timestamp: i64,
    /// Inclusive.
    pub end_timestamp: i64,
    pub duration: i64,
    pub devices: Vec<String>,
    /// One entry per second in `[begin_timestamp, end_timestamp]`.
    pub timestamps: Vec<FollowingTimestamp>,
}

impl FollowingData {
    /// The co-moving records at the given timestamp.
    pub fn data_at(&self, timestamp: i64) -> &FollowingTimestamp {
        assert!(
            timestamp >= self.begin_timestamp && timestamp <= self.end_timestamp,
            "timestamp in range"
        );
        &self.timestamps[(timestamp - self.begin_timestamp) as usize]
    }

    /// Checks the header invariants, e.g. after loading from an archive.
    pub fn validate(&self) -> Result<()> {
        if self.duration != self.end_timestamp - self.begin_timestamp + 1
            || self.timestamps.len() != self.duration as usize
        {
            return Err(Error::Range(format!(
                "following data duration {} does not match range [{}, {}]",
                self.duration, self.begin_timestamp, self.end_timestamp
            )));
        }
        for entry in &self.timestamps {
            for pair in &entry.co_moving {
                if pair.left >= self.devices.len() || pair.right >= self.devices.len() {
                    return Err(Error::Range(format!(
                        "pair ({}, {}) references unknown devices",
                        pair.left, pair.right
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Classifies the similarity data: every `(pair, timestamp)` whose
/// feature vector the classifier accepts as co-moving gets a lag
/// estimate and a following type.
pub fn classify(classifier: &mut CoMovingClassifier, data: &SimilarityData) -> FollowingData {
    let time_lag = (data.feature_dimension - 1) / 2;
    let estimation = TimeLagEstimation::new(time_lag);

    let mut result = FollowingData {
        begin_timestamp: data.begin_timestamp,
        end_timestamp: data.end_timestamp,
        duration: data.duration,
        devices: data.devices.clone(),
        timestamps: (0..data.duration)
            .map(|offset| FollowingTimestamp {
                timestamp: data.begin_timestamp + offset,
                co_moving: Vec::new(),
            })
            .collect(),
    };

    for ts in data.begin_timestamp..=data.end_timestamp {
        for pair in &data.pairs {
            let feature = data.feature_at(pair, ts);
            if !classifier.co_moving(feature) {
                continue;
            }

            let lag = estimation.estimate_lag_complex(feature);
            let kind = estimation.following_type(lag);
            result.timestamps[(ts - data.begin_timestamp) as usize]
                .co_moving
                .push(FollowingPair {
                    left: pair.left,
                    right: pair.right,
                    lag,
                    kind,
                });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn estimates_time_lag() {
        let est = TimeLagEstimation::new(2);

        let rows: [[f64; 5]; 3] = [
            [-1.0, -2.0, -3.0, -4.0, -5.0], // following
            [-2.0, -1.0, 0.4, 1.0, 2.0],    // co-leading
            [5.0, 4.0, 3.0, 2.0, 1.0],      // leading
        ];

        let est1 = est.estimate_lag_simple(&rows[0]);
        assert_eq!(est1, -2.0);
        assert_eq!(est.following_type(est1), FollowingType::Following);

        let est2 = est.estimate_lag_simple(&rows[1]);
        assert_eq!(est2, 0.0);
        assert_eq!(est.following_type(est2), FollowingType::CoLeading);

        let est3 = est.estimate_lag_simple(&rows[2]);
        assert_eq!(est3, 2.0);
        assert_eq!(est.following_type(est3), FollowingType::Leading);
    }

    #[test]
    fn simple_estimate_prefers_the_first_minimum() {
        let est = TimeLagEstimation::new(1);
        assert_eq!(est.estimate_lag_simple(&[2.0, 1.0, 1.0]), 0.0);
    }

    #[test]
    fn complex_estimate_weights_by_reciprocals() {
        let est = TimeLagEstimation::new(1);

        // Symmetric vector: the weighted lags cancel out.
        assert_relative_eq!(est.estimate_lag_complex(&[2.0, 1.0, 2.0]), 0.0);

        // Reciprocal weights: 1/1, 1/2, 1/4 for lags -1, 0, 1.
        let estimate = est.estimate_lag_complex(&[1.0, 2.0, 4.0]);
        assert_relative_eq!(estimate, (-1.0 + 0.25) / 1.75);
    }

    #[test]
    fn complex_estimate_clamps_values_near_zero() {
        let est = TimeLagEstimation::new(1);
        // A zero similarity is clamped to +0.001 instead of producing an
        // infinite weight.
        let estimate = est.estimate_lag_complex(&[1.0, 1.0, 0.0]);
        assert!(estimate.is_finite());
        assert!(estimate > 0.9);
    }

    #[test]
    fn type_mapping_thresholds() {
        let est = TimeLagEstimation::new(3);
        assert_eq!(est.following_type(0.05), FollowingType::CoLeading);
        assert_eq!(est.following_type(-0.1), FollowingType::CoLeading);
        assert_eq!(est.following_type(-0.2), FollowingType::Following);
        assert_eq!(est.following_type(1.5), FollowingType::Leading);
    }

    #[test]
    fn following_data_lookup_and_validation() {
        let data = FollowingData {
            begin_timestamp: 10,
            end_timestamp: 11,
            duration: 2,
            devices: vec!["A".into(), "B".into()],
            timestamps: vec![
                FollowingTimestamp {
                    timestamp: 10,
                    co_moving: vec![FollowingPair {
                        left: 0,
                        right: 1,
                        lag: -1.5,
                        kind: FollowingType::Following,
                    }],
                },
                FollowingTimestamp {
                    timestamp: 11,
                    co_moving: vec![],
                },
            ],
        };

        data.validate().unwrap();
        assert_eq!(data.data_at(10).co_moving.len(), 1);
        assert_eq!(data.data_at(11).co_moving.len(), 0);

        let mut broken = data.clone();
        broken.duration = 5;
        assert!(broken.validate().is_err());

        let mut broken = data;
        broken.timestamps[0].co_moving[0].right = 7;
        assert!(broken.validate().is_err());
    }

    #[test]
    fn following_type_serde_names() {
        let json = serde_json::to_string(&FollowingType::CoLeading).unwrap();
        assert_eq!(json, "\"co_leading\"");
        let back: FollowingType = serde_json::from_str("\"following\"").unwrap();
        assert_eq!(back, FollowingType::Following);
    }
}
