//! Similarity feature computation.
//!
//! For every device pair and every second of the experiment this stage
//! computes a feature vector of `2 * time_lag + 1` similarity values, one
//! per lag in `[-time_lag, +time_lag]`. The three kernels (Euclidean,
//! per-column DTW, multi-dimensional DTW) share one driver:
//!
//! ```text
//! foreach device pair p
//!     foreach timestamp t
//!         foreach lag l
//!             features[p][t][l] = similarity(t, l)
//! ```
//!
//! The pair loop is parallelized: the pair list is split into contiguous
//! blocks of roughly equal size, one block per worker, and every worker
//! owns a private kernel instance because the kernels carry mutable
//! scratch buffers. Outputs are disjoint, so the result does not depend
//! on the number of threads.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::array2d::Array2;
use crate::error::{Error, Result};
use crate::metrics::{euclidean_distance, manhattan_distance_1, Dtw};
use crate::trace::{DeviceTrace, TracingData};

// ============================================================================
// SIMILARITY DATA
// ============================================================================

/// Feature vectors for a single device pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairFeatures {
    /// Index into [`SimilarityData::devices`].
    pub left: usize,
    /// Same.
    pub right: usize,
    /// One row per second, one column per lag.
    pub features: Array2<f64>,
}

/// Feature vectors for every device pair and every timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityData {
    /// First timestamp of the data.
    pub begin_timestamp: i64,
    /// Last timestamp of the data (inclusive).
    pub end_timestamp: i64,
    /// Number of timestamps.
    pub duration: i64,
    /// Length of each feature vector (`2 * time_lag + 1`).
    pub feature_dimension: usize,
    /// All device names.
    pub devices: Vec<String>,
    /// One entry per pair.
    pub pairs: Vec<PairFeatures>,
}

impl SimilarityData {
    /// The feature vector of `pair` at `timestamp`.
    pub fn feature_at<'a>(&self, pair: &'a PairFeatures, timestamp: i64) -> &'a [f64] {
        assert!(
            timestamp >= self.begin_timestamp && timestamp <= self.end_timestamp,
            "timestamp in range"
        );
        pair.features.row((timestamp - self.begin_timestamp) as usize)
    }

    /// Checks the header and matrix-shape invariants, e.g. after loading
    /// the structure from an archive.
    pub fn validate(&self) -> Result<()> {
        if self.duration != self.end_timestamp - self.begin_timestamp + 1 {
            return Err(Error::Range(format!(
                "similarity duration {} does not match range [{}, {}]",
                self.duration, self.begin_timestamp, self.end_timestamp
            )));
        }
        for pair in &self.pairs {
            if pair.left >= self.devices.len() || pair.right >= self.devices.len() {
                return Err(Error::Range(format!(
                    "pair ({}, {}) references unknown devices",
                    pair.left, pair.right
                )));
            }
            if pair.features.rows() != self.duration as usize
                || pair.features.columns() != self.feature_dimension
            {
                return Err(Error::Range(format!(
                    "pair ({}, {}) has feature shape {}x{}, expected {}x{}",
                    pair.left,
                    pair.right,
                    pair.features.rows(),
                    pair.features.columns(),
                    self.duration,
                    self.feature_dimension
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// DRIVER
// ============================================================================

/// Settings for the similarity computation.
///
/// `time_lag` is called `z` and `window_size` is called `w` in the
/// descriptions below. The caller must provide at least `w + z` seconds
/// of tracing data.
#[derive(Debug, Clone)]
pub struct FeatureComputation {
    /// Lags in `[-time_lag, +time_lag]` are evaluated per timestamp.
    pub time_lag: usize,
    /// Number of data points visited per similarity value (half into the
    /// past, half into the future). Must be positive.
    pub window_size: usize,
    /// Number of worker threads. Capped at the number of pairs.
    pub threads: usize,
    /// First timestamp of the experiment (inclusive).
    pub begin_timestamp: i64,
    /// Last timestamp of the experiment (inclusive).
    pub end_timestamp: i64,
}

impl Default for FeatureComputation {
    fn default() -> Self {
        Self {
            time_lag: 5,
            window_size: 10,
            threads: 1,
            begin_timestamp: 0,
            end_timestamp: 0,
        }
    }
}

impl FeatureComputation {
    /// Computes similarity data using the Euclidean distance kernel.
    pub fn compute_euclid(
        &self,
        td: &TracingData,
        pairs: &[(usize, usize)],
    ) -> Result<SimilarityData> {
        self.run::<EuclidKernel>(td, pairs)
    }

    /// Computes similarity data using the per-column DTW kernel.
    pub fn compute_dtw(
        &self,
        td: &TracingData,
        pairs: &[(usize, usize)],
    ) -> Result<SimilarityData> {
        self.run::<DtwKernel>(td, pairs)
    }

    /// Computes similarity data using the multi-dimensional DTW kernel.
    pub fn compute_multi_dtw(
        &self,
        td: &TracingData,
        pairs: &[(usize, usize)],
    ) -> Result<SimilarityData> {
        self.run::<MultiDtwKernel>(td, pairs)
    }

    /// Runs the per-column DTW over every (pair, timestamp, lag) and
    /// counts how often each cost-matrix cell is crossed by a warp path.
    /// Returns the relative frequencies.
    pub fn evaluate_warp_paths(
        &self,
        td: &TracingData,
        pairs: &[(usize, usize)],
    ) -> Result<Array2<f64>> {
        self.validate(td, pairs)?;

        let ctx = ComputeContext {
            td,
            time_lag: self.time_lag,
            window_size: self.window_size,
            begin_timestamp: self.begin_timestamp,
            end_timestamp: self.end_timestamp,
        };
        let z = self.time_lag as i64;

        let mut eval = WarpPathCounter::new(&ctx);
        for &(left, right) in pairs {
            let left = &td.devices[left];
            let right = &td.devices[right];
            for ts in self.begin_timestamp..=self.end_timestamp {
                for lag in -z..=z {
                    eval.visit(&ctx, ts, lag, left, right);
                }
            }
        }
        eval.frequencies()
    }

    fn validate(&self, td: &TracingData, pairs: &[(usize, usize)]) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::InvalidParameters("window size must be > 0".into()));
        }
        if self.threads == 0 {
            return Err(Error::InvalidParameters("thread count must be > 0".into()));
        }
        if (td.duration as usize) < self.window_size + self.time_lag {
            return Err(Error::InvalidParameters(
                "must at least provide time lag + window size measurements".into(),
            ));
        }
        if self.begin_timestamp < td.min_timestamp {
            return Err(Error::InvalidParameters(
                "begin timestamp must be in range of source data".into(),
            ));
        }
        if self.end_timestamp < self.begin_timestamp {
            return Err(Error::InvalidParameters(
                "end timestamp must be >= begin timestamp".into(),
            ));
        }
        if self.end_timestamp > td.max_timestamp {
            return Err(Error::InvalidParameters(
                "end timestamp must be in range of source data".into(),
            ));
        }
        for &(left, right) in pairs {
            if left >= td.devices.len() || right >= td.devices.len() {
                return Err(Error::Range(format!(
                    "pair ({left}, {right}) references unknown devices"
                )));
            }
        }
        Ok(())
    }

    fn run<K: SimilarityKernel>(
        &self,
        td: &TracingData,
        pairs: &[(usize, usize)],
    ) -> Result<SimilarityData> {
        self.validate(td, pairs)?;

        let duration = self.end_timestamp - self.begin_timestamp + 1;
        let feature_dimension = self.time_lag * 2 + 1;

        let mut result = SimilarityData {
            begin_timestamp: self.begin_timestamp,
            end_timestamp: self.end_timestamp,
            duration,
            feature_dimension,
            devices: td.devices.iter().map(|dev| dev.name.clone()).collect(),
            pairs: pairs
                .iter()
                .map(|&(left, right)| PairFeatures {
                    left,
                    right,
                    features: Array2::new(duration as usize, feature_dimension),
                })
                .collect(),
        };

        let ctx = ComputeContext {
            td,
            time_lag: self.time_lag,
            window_size: self.window_size,
            begin_timestamp: self.begin_timestamp,
            end_timestamp: self.end_timestamp,
        };

        let threads_used = self.threads.min(result.pairs.len());
        if threads_used > 1 {
            run_parallel::<K>(&ctx, &mut result.pairs, threads_used)?;
        } else {
            let mut kernel = K::new(&ctx);
            for pair in &mut result.pairs {
                compute_pair(&ctx, &mut kernel, pair);
            }
        }

        Ok(result)
    }
}

/// Splits the pair list into `threads_used` contiguous blocks and fills
/// them concurrently; the last block absorbs the remainder. Every worker
/// builds its own kernel (the scratch buffers are not thread-safe).
fn run_parallel<K: SimilarityKernel>(
    ctx: &ComputeContext<'_>,
    pairs: &mut [PairFeatures],
    threads_used: usize,
) -> Result<()> {
    let chunk_size = pairs.len() / threads_used;
    debug_assert!(chunk_size > 0);
    debug!(
        workers = threads_used,
        pairs = pairs.len(),
        chunk_size, "partitioning similarity computation"
    );

    let mut blocks: Vec<&mut [PairFeatures]> = Vec::with_capacity(threads_used);
    let mut rest = pairs;
    for _ in 0..threads_used - 1 {
        let (block, tail) = rest.split_at_mut(chunk_size);
        blocks.push(block);
        rest = tail;
    }
    blocks.push(rest);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads_used)
        .build()
        .map_err(|e| Error::ThreadPool(e.to_string()))?;

    pool.install(|| {
        blocks.into_par_iter().for_each(|block| {
            let mut kernel = K::new(ctx);
            for pair in block.iter_mut() {
                compute_pair(ctx, &mut kernel, pair);
            }
        });
    });
    Ok(())
}

/// Fills the feature matrix of one pair.
fn compute_pair<K: SimilarityKernel>(
    ctx: &ComputeContext<'_>,
    kernel: &mut K,
    pair: &mut PairFeatures,
) {
    let left = &ctx.td.devices[pair.left];
    let right = &ctx.td.devices[pair.right];
    let z = ctx.time_lag as i64;

    for ts in ctx.begin_timestamp..=ctx.end_timestamp {
        let row = pair.features.row_mut((ts - ctx.begin_timestamp) as usize);
        for (i, lag) in (-z..=z).enumerate() {
            row[i] = kernel.compute_similarity(ctx, ts, lag, left, right);
        }
    }
}

// ============================================================================
// KERNELS
// ============================================================================

/// Read-only state shared by all similarity workers.
struct ComputeContext<'a> {
    td: &'a TracingData,
    time_lag: usize,
    window_size: usize,
    begin_timestamp: i64,
    end_timestamp: i64,
}

impl ComputeContext<'_> {
    /// Keeps a timestamp inside the tracing data range. Out-of-bounds
    /// lookups behave as if the device had not moved.
    fn clamp(&self, ts: i64) -> i64 {
        ts.clamp(self.td.min_timestamp, self.td.max_timestamp)
    }

    /// Like [`ComputeContext::clamp`], but ensures that the whole window
    /// `[ts, ts + window_size)` stays inside the tracing data range.
    fn clamp_window(&self, ts: i64) -> i64 {
        let min = self.td.min_timestamp;
        let max = self.td.max_timestamp;
        let length = self.window_size as i64;
        debug_assert!(max - min + 1 >= length);

        if ts < min {
            min
        } else if ts + length - 1 > max {
            max - length + 1
        } else {
            ts
        }
    }
}

/// One concrete similarity measure. Instances carry mutable scratch and
/// must not be shared between workers.
trait SimilarityKernel {
    fn new(ctx: &ComputeContext<'_>) -> Self;

    /// The similarity of `left` around `ts` and `right` around `ts + lag`.
    fn compute_similarity(
        &mut self,
        ctx: &ComputeContext<'_>,
        ts: i64,
        lag: i64,
        left: &DeviceTrace,
        right: &DeviceTrace,
    ) -> f64;
}

/// Mean Euclidean distance between the two windows.
struct EuclidKernel {
    half_window: i64,
    inverse_window: f64,
    left_buf: Vec<f64>,
    right_buf: Vec<f64>,
}

impl SimilarityKernel for EuclidKernel {
    fn new(ctx: &ComputeContext<'_>) -> Self {
        Self {
            half_window: (ctx.window_size / 2) as i64,
            inverse_window: 1.0 / ctx.window_size as f64,
            left_buf: vec![0.0; ctx.td.data_dimension],
            right_buf: vec![0.0; ctx.td.data_dimension],
        }
    }

    fn compute_similarity(
        &mut self,
        ctx: &ComputeContext<'_>,
        ts: i64,
        lag: i64,
        left: &DeviceTrace,
        right: &DeviceTrace,
    ) -> f64 {
        let td = ctx.td;
        let left_has = td.has_data_at(left, ts);
        let right_has = td.has_data_at(right, ctx.clamp(ts + lag));

        let mut result = 0.0;
        let mut left_ts = ts - self.half_window;
        let mut right_ts = left_ts + lag;
        for _ in 0..ctx.window_size {
            let left_row = td.data_at(left, ctx.clamp(left_ts));
            let right_row = td.data_at(right, ctx.clamp(right_ts));

            // Restrict both vectors to the union of seen access points.
            let mut n = 0;
            for c in 0..td.data_dimension {
                if left_has[c] != 0 || right_has[c] != 0 {
                    self.left_buf[n] = left_row[c];
                    self.right_buf[n] = right_row[c];
                    n += 1;
                }
            }
            result += euclidean_distance(&self.left_buf[..n], &self.right_buf[..n]);

            left_ts += 1;
            right_ts += 1;
        }
        result * self.inverse_window
    }
}

/// Sum of per-column DTW costs over the two windows, normalized by
/// `1 / (2 * window_size)` and by the number of columns used.
struct DtwKernel {
    half_window: i64,
    norm_factor: f64,
    dtw: Dtw,
    left_buf: Vec<f64>,
    right_buf: Vec<f64>,
}

impl SimilarityKernel for DtwKernel {
    fn new(ctx: &ComputeContext<'_>) -> Self {
        Self {
            half_window: (ctx.window_size / 2) as i64,
            norm_factor: 1.0 / (2.0 * ctx.window_size as f64),
            dtw: Dtw::new(ctx.window_size, ctx.window_size),
            left_buf: vec![0.0; ctx.window_size],
            right_buf: vec![0.0; ctx.window_size],
        }
    }

    fn compute_similarity(
        &mut self,
        ctx: &ComputeContext<'_>,
        ts: i64,
        lag: i64,
        left: &DeviceTrace,
        right: &DeviceTrace,
    ) -> f64 {
        let td = ctx.td;
        let left_has = td.has_data_at(left, ts);
        let right_has = td.has_data_at(right, ctx.clamp(ts + lag));

        let left_ts = ctx.clamp_window(ts - self.half_window);
        let right_ts = ctx.clamp_window(ts - self.half_window + lag);

        // Every column is a time series for one dimension (one access
        // point's signal strength or one coordinate over time).
        let mut columns_used = 0;
        let mut result = 0.0;
        for col in 0..td.data_dimension {
            if left_has[col] == 0 && right_has[col] == 0 {
                continue;
            }
            for j in 0..ctx.window_size {
                self.left_buf[j] = td.data_at(left, left_ts + j as i64)[col];
                self.right_buf[j] = td.data_at(right, right_ts + j as i64)[col];
            }
            result += self
                .dtw
                .run_slices(&self.left_buf, &self.right_buf, manhattan_distance_1);
            columns_used += 1;
        }

        if columns_used == 0 {
            return 0.0;
        }
        result * self.norm_factor / columns_used as f64
    }
}

/// Multi-dimensional DTW: every window row is treated as one n-vector and
/// the window becomes a single n-dimensional time series.
struct MultiDtwKernel {
    half_window: i64,
    norm_factor: f64,
    dtw: Dtw,
    left_buf: Array2<f64>,
    right_buf: Array2<f64>,
}

impl SimilarityKernel for MultiDtwKernel {
    fn new(ctx: &ComputeContext<'_>) -> Self {
        Self {
            half_window: (ctx.window_size / 2) as i64,
            norm_factor: 1.0 / (2.0 * ctx.window_size as f64),
            dtw: Dtw::new(ctx.window_size, ctx.window_size),
            left_buf: Array2::new(ctx.window_size, ctx.td.data_dimension),
            right_buf: Array2::new(ctx.window_size, ctx.td.data_dimension),
        }
    }

    fn compute_similarity(
        &mut self,
        ctx: &ComputeContext<'_>,
        ts: i64,
        lag: i64,
        left: &DeviceTrace,
        right: &DeviceTrace,
    ) -> f64 {
        let td = ctx.td;
        let left_has = td.has_data_at(left, ts);
        let right_has = td.has_data_at(right, ctx.clamp(ts + lag));

        let left_ts = ctx.clamp_window(ts - self.half_window);
        let right_ts = ctx.clamp_window(ts - self.half_window + lag);

        // Assemble both window matrices, skipping unseen columns. The
        // buffers are preallocated for the full dimension; only the first
        // `n` columns are meaningful afterwards.
        let mut n = 0;
        for col in 0..td.data_dimension {
            if left_has[col] == 0 && right_has[col] == 0 {
                continue;
            }
            for j in 0..ctx.window_size {
                *self.left_buf.cell_mut(j, n) = td.data_at(left, left_ts + j as i64)[col];
                *self.right_buf.cell_mut(j, n) = td.data_at(right, right_ts + j as i64)[col];
            }
            n += 1;
        }
        if n == 0 {
            return 0.0;
        }

        let (left_buf, right_buf) = (&self.left_buf, &self.right_buf);
        let cost = self.dtw.run(ctx.window_size, ctx.window_size, |i, j| {
            euclidean_distance(&left_buf.row(i)[..n], &right_buf.row(j)[..n])
        });
        cost * self.norm_factor
    }
}

/// Counts how often warp-path cells are visited across all per-column
/// DTW runs (the `eval-dtw` diagnostic).
struct WarpPathCounter {
    half_window: i64,
    dtw: Dtw,
    counters: Array2<i64>,
    runs: i64,
    left_buf: Vec<f64>,
    right_buf: Vec<f64>,
    path_buf: Vec<(usize, usize)>,
}

impl WarpPathCounter {
    fn new(ctx: &ComputeContext<'_>) -> Self {
        Self {
            half_window: (ctx.window_size / 2) as i64,
            dtw: Dtw::new(ctx.window_size, ctx.window_size),
            counters: Array2::new(ctx.window_size, ctx.window_size),
            runs: 0,
            left_buf: vec![0.0; ctx.window_size],
            right_buf: vec![0.0; ctx.window_size],
            path_buf: Vec::with_capacity(2 * ctx.window_size),
        }
    }

    fn visit(
        &mut self,
        ctx: &ComputeContext<'_>,
        ts: i64,
        lag: i64,
        left: &DeviceTrace,
        right: &DeviceTrace,
    ) {
        let td = ctx.td;
        let left_has = td.has_data_at(left, ts);
        let right_has = td.has_data_at(right, ctx.clamp(ts + lag));

        let left_ts = ctx.clamp_window(ts - self.half_window);
        let right_ts = ctx.clamp_window(ts - self.half_window + lag);

        for col in 0..td.data_dimension {
            if left_has[col] == 0 && right_has[col] == 0 {
                continue;
            }
            for j in 0..ctx.window_size {
                self.left_buf[j] = td.data_at(left, left_ts + j as i64)[col];
                self.right_buf[j] = td.data_at(right, right_ts + j as i64)[col];
            }
            self.dtw
                .run_slices(&self.left_buf, &self.right_buf, manhattan_distance_1);
            self.dtw.warp_path_into(&mut self.path_buf);
            for &(i, j) in &self.path_buf {
                *self.counters.cell_mut(i, j) += 1;
            }
            self.runs += 1;
        }
    }

    fn frequencies(&self) -> Result<Array2<f64>> {
        if self.runs == 0 {
            return Err(Error::EmptyInput("no warp paths were computed"));
        }
        let mut result = Array2::new(self.counters.rows(), self.counters.columns());
        for row in 0..result.rows() {
            for col in 0..result.columns() {
                *result.cell_mut(row, col) =
                    *self.counters.cell(row, col) as f64 / self.runs as f64;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::DeviceTrace;

    /// A trace with one scalar dimension per device, masks all set.
    fn scalar_trace(devices: &[(&str, &[f64])]) -> TracingData {
        let duration = devices[0].1.len();
        TracingData {
            data_dimension: 1,
            min_timestamp: 0,
            max_timestamp: duration as i64 - 1,
            duration: duration as i64,
            devices: devices
                .iter()
                .map(|(name, values)| DeviceTrace {
                    name: (*name).to_string(),
                    data: Array2::from_vec(values.to_vec(), duration, 1),
                    has_data: Array2::filled(duration, 1, 1),
                })
                .collect(),
        }
    }

    fn settings(time_lag: usize, window_size: usize, end: i64) -> FeatureComputation {
        FeatureComputation {
            time_lag,
            window_size,
            threads: 1,
            begin_timestamp: 0,
            end_timestamp: end,
        }
    }

    #[test]
    fn result_has_expected_shape() {
        let td = scalar_trace(&[
            ("a", &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]),
            ("b", &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]),
            ("c", &[5.0, 4.0, 3.0, 2.0, 1.0, 0.0]),
        ]);
        let pairs = td.unique_pairs();
        let sim = settings(2, 3, 5).compute_dtw(&td, &pairs).unwrap();

        assert_eq!(sim.duration, 6);
        assert_eq!(sim.feature_dimension, 5);
        assert_eq!(sim.devices, vec!["a", "b", "c"]);
        assert_eq!(sim.pairs.len(), 3);
        for pair in &sim.pairs {
            assert_eq!(pair.features.rows(), 6);
            assert_eq!(pair.features.columns(), 5);
        }
        sim.validate().unwrap();
    }

    #[test]
    fn euclid_zero_lag_is_plain_distance() {
        // Window of one: the feature at lag 0 is just the distance at ts.
        let td = scalar_trace(&[("a", &[0.0, 1.0, 2.0]), ("b", &[1.0, 3.0, 2.0])]);
        let sim = settings(0, 1, 2)
            .compute_euclid(&td, &[(0, 1)])
            .unwrap();

        let pair = &sim.pairs[0];
        assert_eq!(sim.feature_at(pair, 0), &[1.0]);
        assert_eq!(sim.feature_at(pair, 1), &[2.0]);
        assert_eq!(sim.feature_at(pair, 2), &[0.0]);
    }

    #[test]
    fn lag_columns_are_ordered_from_negative_to_positive() {
        // b runs one second ahead of a (a sits where b was a second ago),
        // so with window 1 the distance vanishes at lag -1 and only there.
        let td = scalar_trace(&[("a", &[0.0, 1.0, 2.0, 3.0]), ("b", &[1.0, 2.0, 3.0, 4.0])]);
        let sim = settings(1, 1, 3).compute_euclid(&td, &[(0, 1)]).unwrap();

        let row = sim.feature_at(&sim.pairs[0], 1);
        // Columns: lag -1, lag 0, lag +1.
        assert_eq!(row, &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn dtw_kernel_is_zero_for_identical_traces() {
        let values = [0.0, 1.0, 4.0, 2.0, 3.0, 3.0];
        let td = scalar_trace(&[("a", &values), ("b", &values)]);
        let sim = settings(0, 3, 5).compute_dtw(&td, &[(0, 1)]).unwrap();

        for ts in 0..=5 {
            assert_eq!(sim.feature_at(&sim.pairs[0], ts), &[0.0]);
        }
    }

    #[test]
    fn multi_dtw_matches_dtw_for_one_dimension() {
        // With a single data dimension the row vectors are scalars, and
        // the euclidean row distance degenerates to the manhattan one.
        // The only difference is the per-column normalization (n == 1).
        let td = scalar_trace(&[("a", &[0.0, 2.0, 1.0, 5.0]), ("b", &[1.0, 1.0, 3.0, 4.0])]);
        let settings = settings(1, 2, 3);
        let single = settings.compute_dtw(&td, &[(0, 1)]).unwrap();
        let multi = settings.compute_multi_dtw(&td, &[(0, 1)]).unwrap();

        for ts in 0..=3 {
            assert_eq!(
                single.feature_at(&single.pairs[0], ts),
                multi.feature_at(&multi.pairs[0], ts),
            );
        }
    }

    #[test]
    fn unseen_columns_are_skipped() {
        // Two dimensions, second one never observed by either device:
        // kernels must only look at the first column.
        let mut td = scalar_trace(&[("a", &[0.0, 1.0, 2.0]), ("b", &[0.0, 1.0, 2.0])]);
        td.data_dimension = 2;
        for dev in &mut td.devices {
            let rows = dev.data.rows();
            let values: Vec<f64> = dev.data.column(0).iter().copied().collect();
            let mut data = Array2::new(rows, 2);
            let mut has_data = Array2::new(rows, 2);
            for (row, value) in values.into_iter().enumerate() {
                *data.cell_mut(row, 0) = value;
                *data.cell_mut(row, 1) = 1000.0; // Must never be read.
                *has_data.cell_mut(row, 0) = 1;
            }
            dev.data = data;
            dev.has_data = has_data;
        }

        let sim = settings(0, 1, 2).compute_euclid(&td, &[(0, 1)]).unwrap();
        for ts in 0..=2 {
            assert_eq!(sim.feature_at(&sim.pairs[0], ts), &[0.0]);
        }
    }

    #[test]
    fn parallel_output_is_deterministic() {
        let td = scalar_trace(&[
            ("a", &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]),
            ("b", &[1.0, 0.0, 2.0, 4.0, 4.0, 5.0, 5.0, 8.0]),
            ("c", &[7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0, 0.0]),
            ("d", &[0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0]),
        ]);
        let pairs = td.unique_pairs();

        let mut serial_settings = settings(2, 3, 7);
        serial_settings.threads = 1;
        let mut parallel_settings = settings(2, 3, 7);
        parallel_settings.threads = 4;

        let serial = serial_settings.compute_dtw(&td, &pairs).unwrap();
        let parallel = parallel_settings.compute_dtw(&td, &pairs).unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let td = scalar_trace(&[("a", &[0.0, 1.0, 2.0]), ("b", &[0.0, 1.0, 2.0])]);
        let pairs = [(0usize, 1usize)];

        let mut s = settings(0, 0, 2);
        assert!(matches!(
            s.compute_euclid(&td, &pairs),
            Err(Error::InvalidParameters(_))
        ));

        s = settings(0, 1, 2);
        s.threads = 0;
        assert!(matches!(
            s.compute_euclid(&td, &pairs),
            Err(Error::InvalidParameters(_))
        ));

        // Window + lag longer than the data.
        s = settings(2, 2, 2);
        assert!(matches!(
            s.compute_euclid(&td, &pairs),
            Err(Error::InvalidParameters(_))
        ));

        // Range outside of the source data.
        s = settings(0, 1, 3);
        assert!(matches!(
            s.compute_euclid(&td, &pairs),
            Err(Error::InvalidParameters(_))
        ));

        // Unknown device index.
        s = settings(0, 1, 2);
        assert!(matches!(
            s.compute_euclid(&td, &[(0, 5)]),
            Err(Error::Range(_))
        ));
    }

    #[test]
    fn warp_path_frequencies_are_relative() {
        let td = scalar_trace(&[("a", &[0.0, 1.0, 2.0, 3.0]), ("b", &[0.0, 1.0, 2.0, 3.0])]);
        let freqs = settings(1, 2, 3)
            .evaluate_warp_paths(&td, &[(0, 1)])
            .unwrap();

        assert_eq!(freqs.rows(), 2);
        assert_eq!(freqs.columns(), 2);
        // Every warp path starts at (0, 0) and ends at (w-1, w-1).
        assert_eq!(*freqs.cell(0, 0), 1.0);
        assert_eq!(*freqs.cell(1, 1), 1.0);
        for value in freqs.iter() {
            assert!((0.0..=1.0).contains(value));
        }
    }
}
