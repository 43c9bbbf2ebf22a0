//! The co-moving classifier.
//!
//! A linear support vector machine decides whether a feature vector
//! belongs to a co-moving device pair. The classifier is trained from
//! similarity data labelled via ground truth, can be serialized into a
//! self-describing binary blob and reloaded later.
//!
//! Training is deterministic: the sample shuffle and the coordinate
//! descent both draw from a fixed-seed ChaCha stream, so training twice
//! on the same inputs yields bit-identical models.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::features::SimilarityData;
use crate::ground_truth::GroundTruth;

/// Incremented whenever the serialized layout of the model changes.
const VERSION: u32 = 1;

/// Seed for the deterministic training shuffle.
const SHUFFLE_SEED: u64 = 42;

/// Guard against division by a vanishing standard deviation.
const STDDEV_EPSILON: f64 = 1e-9;

/// Coordinate descent iteration cap and convergence tolerance.
const MAX_TRAINING_PASSES: usize = 1000;
const TRAINING_TOLERANCE: f64 = 1e-3;

// ============================================================================
// MODEL
// ============================================================================

/// The trained state: a separating hyperplane plus the input normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LinearModel {
    weights: Vec<f64>,
    bias: f64,
    mean: Vec<f64>,
    stddev: Vec<f64>,
    training_dimension: usize,
}

impl LinearModel {
    /// Decision value for an already normalized sample.
    fn decision(&self, sample: &[f64]) -> f64 {
        dot(&self.weights, sample) + self.bias
    }

    fn normalize(&self, sample: &mut [f64]) {
        for (value, (mean, stddev)) in sample
            .iter_mut()
            .zip(self.mean.iter().zip(&self.stddev))
        {
            *value = (*value - mean) / stddev;
        }
    }
}

/// Classifies feature vectors as either co-moving or not co-moving.
///
/// A fresh classifier is untrained and classifies everything as not
/// co-moving. Prediction reuses an internal scratch buffer and therefore
/// takes `&mut self`; give every thread its own instance.
#[derive(Debug, Clone, Default)]
pub struct CoMovingClassifier {
    model: Option<LinearModel>,
    scratch: Vec<f64>,
}

impl CoMovingClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    /// The feature dimension the model was trained with.
    pub fn training_dimension(&self) -> Option<usize> {
        self.model.as_ref().map(|m| m.training_dimension)
    }

    /// True if the feature vector is classified as "co-moving".
    ///
    /// The vector must have been computed with the same parameters as the
    /// training data; its length must equal the training dimension.
    pub fn co_moving(&mut self, feature: &[f64]) -> bool {
        let Some(model) = &self.model else {
            return false;
        };
        assert_eq!(
            feature.len(),
            model.training_dimension,
            "feature length must equal the training dimension"
        );

        self.scratch.clear();
        self.scratch.extend_from_slice(feature);
        model.normalize(&mut self.scratch);
        model.decision(&self.scratch) >= 0.0
    }

    /// Learns from the data set and ground truth, replacing any previous
    /// state. Every `(pair, timestamp)` becomes one training sample,
    /// labelled positive iff the ground truth reports the pair as
    /// co-moving at that second.
    pub fn learn(&mut self, data: &SimilarityData, gt: &GroundTruth) -> Result<()> {
        let (mut samples, mut labels) = learning_data(data, gt);
        if samples.is_empty() {
            return Err(Error::EmptyInput("no training samples"));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(SHUFFLE_SEED);
        shuffle_in_unison(&mut samples, &mut labels, &mut rng);

        let (mean, stddev) = fit_normalizer(&samples, data.feature_dimension);
        for sample in &mut samples {
            normalize(sample, &mean, &stddev);
        }

        let (weights, bias) = train_linear_svm(&samples, &labels, 1.0, &mut rng);
        debug!(
            samples = samples.len(),
            dimension = data.feature_dimension,
            "trained co-moving classifier"
        );

        self.model = Some(LinearModel {
            weights,
            bias,
            mean,
            stddev,
            training_dimension: data.feature_dimension,
        });
        Ok(())
    }

    // ========================================================================
    // SERIALIZATION
    // ========================================================================

    /// Serializes the classifier into a self-describing binary blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = postcard::to_allocvec(&VERSION)?;
        bytes.extend(postcard::to_allocvec(&self.model)?);
        Ok(bytes)
    }

    /// Restores a classifier from [`CoMovingClassifier::to_bytes`] output.
    ///
    /// Fails with [`Error::VersionMismatch`] if the blob was written by an
    /// incompatible layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (version, rest) = postcard::take_from_bytes::<u32>(bytes)?;
        if version != VERSION {
            return Err(Error::VersionMismatch {
                found: version,
                expected: VERSION,
            });
        }
        let model: Option<LinearModel> = postcard::from_bytes(rest)?;
        Ok(Self {
            model,
            scratch: Vec::new(),
        })
    }

    // ========================================================================
    // CROSS VALIDATION
    // ========================================================================

    /// Runs 3-fold cross validation for a geometric sweep of the SVM cost
    /// parameter `C` in `{1, 5, 25, ...} < 100000`.
    ///
    /// This is a developer diagnostic; it does not produce or alter any
    /// trained classifier.
    pub fn cross_validate(
        data: &SimilarityData,
        gt: &GroundTruth,
    ) -> Result<Vec<CrossValidationResult>> {
        const FOLDS: usize = 3;

        let (mut samples, mut labels) = learning_data(data, gt);
        if samples.len() < FOLDS {
            return Err(Error::EmptyInput("not enough cross-validation samples"));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(SHUFFLE_SEED);
        shuffle_in_unison(&mut samples, &mut labels, &mut rng);

        let (mean, stddev) = fit_normalizer(&samples, data.feature_dimension);
        for sample in &mut samples {
            normalize(sample, &mean, &stddev);
        }

        let n = samples.len();
        let mut results = Vec::new();
        let mut c = 1.0;
        while c < 100_000.0 {
            let mut true_positive = 0usize;
            let mut true_negative = 0usize;
            let mut positive = 0usize;
            let mut negative = 0usize;

            for fold in 0..FOLDS {
                let test_begin = fold * n / FOLDS;
                let test_end = (fold + 1) * n / FOLDS;

                let mut train_samples = Vec::with_capacity(n - (test_end - test_begin));
                let mut train_labels = Vec::with_capacity(train_samples.capacity());
                for i in (0..test_begin).chain(test_end..n) {
                    train_samples.push(samples[i].clone());
                    train_labels.push(labels[i]);
                }

                let mut fold_rng = ChaCha8Rng::seed_from_u64(SHUFFLE_SEED ^ fold as u64);
                let (weights, bias) =
                    train_linear_svm(&train_samples, &train_labels, c, &mut fold_rng);

                for i in test_begin..test_end {
                    let predicted = dot(&weights, &samples[i]) + bias >= 0.0;
                    if labels[i] > 0.0 {
                        positive += 1;
                        if predicted {
                            true_positive += 1;
                        }
                    } else {
                        negative += 1;
                        if !predicted {
                            true_negative += 1;
                        }
                    }
                }
            }

            results.push(CrossValidationResult {
                c,
                positive_accuracy: fraction(true_positive, positive),
                negative_accuracy: fraction(true_negative, negative),
            });
            c *= 5.0;
        }
        Ok(results)
    }
}

/// Per-`C` accuracies of one cross-validation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationResult {
    /// SVM cost parameter.
    pub c: f64,
    /// Fraction of correctly classified co-moving samples.
    pub positive_accuracy: f64,
    /// Fraction of correctly classified non-co-moving samples.
    pub negative_accuracy: f64,
}

// ============================================================================
// TRAINING INTERNALS
// ============================================================================

/// Extracts one sample per `(pair, timestamp)` plus +1/-1 labels.
fn learning_data(data: &SimilarityData, gt: &GroundTruth) -> (Vec<Vec<f64>>, Vec<f64>) {
    let capacity = data.pairs.len() * data.duration as usize;
    let mut samples = Vec::with_capacity(capacity);
    let mut labels = Vec::with_capacity(capacity);

    for pair in &data.pairs {
        let left_name = &data.devices[pair.left];
        let right_name = &data.devices[pair.right];

        for ts in data.begin_timestamp..=data.end_timestamp {
            samples.push(data.feature_at(pair, ts).to_vec());
            let co_moving = gt.co_moving_at(ts, left_name, right_name);
            labels.push(if co_moving { 1.0 } else { -1.0 });
        }
    }
    (samples, labels)
}

fn shuffle_in_unison(samples: &mut [Vec<f64>], labels: &mut [f64], rng: &mut ChaCha8Rng) {
    let mut order: Vec<usize> = (0..samples.len()).collect();
    order.shuffle(rng);
    apply_permutation(samples, &order);
    apply_permutation(labels, &order);
}

/// Reorders `values` so that `values[i] = old_values[order[i]]`.
fn apply_permutation<T: Clone>(values: &mut [T], order: &[usize]) {
    let snapshot: Vec<T> = values.to_vec();
    for (slot, &source) in values.iter_mut().zip(order) {
        *slot = snapshot[source].clone();
    }
}

/// Column means and standard deviations of the training set.
fn fit_normalizer(samples: &[Vec<f64>], dimension: usize) -> (Vec<f64>, Vec<f64>) {
    let n = samples.len() as f64;
    let mut mean = vec![0.0; dimension];
    for sample in samples {
        for (m, value) in mean.iter_mut().zip(sample) {
            *m += value;
        }
    }
    for m in &mut mean {
        *m /= n;
    }

    let mut stddev = vec![0.0; dimension];
    if samples.len() > 1 {
        for sample in samples {
            for (s, (value, m)) in stddev.iter_mut().zip(sample.iter().zip(&mean)) {
                let diff = value - m;
                *s += diff * diff;
            }
        }
        for s in &mut stddev {
            *s = (*s / (n - 1.0)).sqrt();
        }
    }
    for s in &mut stddev {
        *s = s.max(STDDEV_EPSILON);
    }
    (mean, stddev)
}

fn normalize(sample: &mut [f64], mean: &[f64], stddev: &[f64]) {
    for (value, (m, s)) in sample.iter_mut().zip(mean.iter().zip(stddev)) {
        *value = (*value - m) / s;
    }
}

/// Trains a linear C-SVM (hinge loss) by dual coordinate descent.
///
/// The bias is handled through an implicit constant feature, so the
/// diagonal of the Gram matrix gains a `+ 1` term. Returns the weight
/// vector and the bias.
fn train_linear_svm(
    samples: &[Vec<f64>],
    labels: &[f64],
    c: f64,
    rng: &mut ChaCha8Rng,
) -> (Vec<f64>, f64) {
    assert!(!samples.is_empty(), "training set must not be empty");
    let n = samples.len();
    let dimension = samples[0].len();

    // w has one extra slot for the bias feature.
    let mut w = vec![0.0; dimension + 1];
    let mut alpha = vec![0.0; n];
    let q: Vec<f64> = samples.iter().map(|x| dot(x, x) + 1.0).collect();

    let mut order: Vec<usize> = (0..n).collect();
    for _pass in 0..MAX_TRAINING_PASSES {
        order.shuffle(rng);

        let mut max_violation = 0.0f64;
        for &i in &order {
            let x = &samples[i];
            let y = labels[i];

            let gradient = y * (dot(&w[..dimension], x) + w[dimension]) - 1.0;
            let projected = if alpha[i] <= 0.0 {
                gradient.min(0.0)
            } else if alpha[i] >= c {
                gradient.max(0.0)
            } else {
                gradient
            };
            max_violation = max_violation.max(projected.abs());

            if projected.abs() > 1e-12 {
                let old = alpha[i];
                alpha[i] = (old - gradient / q[i]).clamp(0.0, c);
                let step = (alpha[i] - old) * y;
                for (wj, xj) in w[..dimension].iter_mut().zip(x) {
                    *wj += step * xj;
                }
                w[dimension] += step;
            }
        }

        if max_violation < TRAINING_TOLERANCE {
            break;
        }
    }

    let bias = w.pop().expect("bias slot");
    (w, bias)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn fraction(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array2d::Array2;
    use crate::features::PairFeatures;
    use crate::ground_truth::GroundTruthEntry;

    /// Similarity data with two pairs: (A, B) has small feature values
    /// and co-moves per ground truth, (A, C) has large values and does
    /// not. Dissimilarity-style features, as the kernels produce them.
    fn training_fixture() -> (SimilarityData, GroundTruth) {
        let duration = 12i64;
        let dimension = 3usize;

        let features = |base: f64| {
            let cells: Vec<f64> = (0..duration as usize * dimension)
                .map(|i| base + (i % dimension) as f64 * 0.1)
                .collect();
            Array2::from_vec(cells, duration as usize, dimension)
        };

        let data = SimilarityData {
            begin_timestamp: 0,
            end_timestamp: duration - 1,
            duration,
            feature_dimension: dimension,
            devices: vec!["A".into(), "B".into(), "C".into()],
            pairs: vec![
                PairFeatures {
                    left: 0,
                    right: 1,
                    features: features(0.5),
                },
                PairFeatures {
                    left: 0,
                    right: 2,
                    features: features(20.0),
                },
            ],
        };

        let mut gt = GroundTruth::default();
        for ts in 0..duration {
            gt.timestamps.insert(
                ts,
                vec![
                    GroundTruthEntry {
                        name: "A".into(),
                        group: 1,
                        order: 0,
                    },
                    GroundTruthEntry {
                        name: "B".into(),
                        group: 1,
                        order: 1,
                    },
                ],
            );
        }
        (data, gt)
    }

    #[test]
    fn untrained_classifier_rejects_everything() {
        let mut classifier = CoMovingClassifier::new();
        assert!(!classifier.is_trained());
        assert!(!classifier.co_moving(&[0.0, 0.0, 0.0]));
    }

    #[test]
    fn learns_to_separate_training_data() {
        let (data, gt) = training_fixture();
        let mut classifier = CoMovingClassifier::new();
        classifier.learn(&data, &gt).unwrap();
        assert!(classifier.is_trained());
        assert_eq!(classifier.training_dimension(), Some(3));

        assert!(classifier.co_moving(&[0.5, 0.6, 0.7]));
        assert!(!classifier.co_moving(&[20.0, 20.1, 20.2]));
    }

    #[test]
    fn prediction_is_repeatable() {
        let (data, gt) = training_fixture();
        let mut classifier = CoMovingClassifier::new();
        classifier.learn(&data, &gt).unwrap();

        let feature = [0.5, 0.6, 0.7];
        let first = classifier.co_moving(&feature);
        let second = classifier.co_moving(&feature);
        assert_eq!(first, second);
    }

    #[test]
    fn training_is_deterministic() {
        let (data, gt) = training_fixture();

        let mut a = CoMovingClassifier::new();
        let mut b = CoMovingClassifier::new();
        a.learn(&data, &gt).unwrap();
        b.learn(&data, &gt).unwrap();

        assert_eq!(a.model, b.model);
    }

    #[test]
    fn learn_rejects_empty_input() {
        let data = SimilarityData::default();
        let gt = GroundTruth::default();
        let mut classifier = CoMovingClassifier::new();
        assert!(matches!(
            classifier.learn(&data, &gt),
            Err(Error::EmptyInput(_))
        ));
    }

    #[test]
    fn blob_round_trip() {
        let (data, gt) = training_fixture();
        let mut classifier = CoMovingClassifier::new();
        classifier.learn(&data, &gt).unwrap();

        let bytes = classifier.to_bytes().unwrap();
        let restored = CoMovingClassifier::from_bytes(&bytes).unwrap();
        assert_eq!(classifier.model, restored.model);

        // An untrained classifier round-trips, too.
        let empty = CoMovingClassifier::new();
        let restored = CoMovingClassifier::from_bytes(&empty.to_bytes().unwrap()).unwrap();
        assert!(!restored.is_trained());
    }

    #[test]
    fn version_mismatch_is_detected() {
        let mut bytes = postcard::to_allocvec(&99u32).unwrap();
        bytes.extend(postcard::to_allocvec(&Option::<LinearModel>::None).unwrap());

        match CoMovingClassifier::from_bytes(&bytes) {
            Err(Error::VersionMismatch { found, expected }) => {
                assert_eq!(found, 99);
                assert_eq!(expected, VERSION);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }

    #[test]
    fn cross_validation_sweeps_the_cost_ladder() {
        let (data, gt) = training_fixture();
        let results = CoMovingClassifier::cross_validate(&data, &gt).unwrap();

        let ladder: Vec<f64> = results.iter().map(|r| r.c).collect();
        assert_eq!(
            ladder,
            vec![1.0, 5.0, 25.0, 125.0, 625.0, 3125.0, 15625.0, 78125.0]
        );
        for result in &results {
            assert!((0.0..=1.0).contains(&result.positive_accuracy));
            assert!((0.0..=1.0).contains(&result.negative_accuracy));
        }
    }

    #[test]
    fn normalizer_guards_constant_columns() {
        let samples = vec![vec![1.0, 5.0], vec![1.0, 7.0], vec![1.0, 9.0]];
        let (mean, stddev) = fit_normalizer(&samples, 2);
        assert_eq!(mean, vec![1.0, 7.0]);
        assert_eq!(stddev[0], STDDEV_EPSILON);
        assert!(stddev[1] > 1.0);
    }
}
