//! Distance metrics and dynamic time warping.
//!
//! The [`Dtw`] struct owns a reusable cost-matrix buffer so that the
//! similarity kernels, which run it once per (pair, timestamp, lag),
//! never allocate inside the hot loop. Instances are not meant to be
//! shared between threads; every similarity worker owns its own.

use crate::array2d::Array2;

/// Manhattan distance, one-dimensional case.
#[inline]
pub fn manhattan_distance_1(a: f64, b: f64) -> f64 {
    (a - b).abs()
}

/// Manhattan distance for n-dimensional vectors.
pub fn manhattan_distance(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have the same size");
    a.iter()
        .zip(b)
        .map(|(x, y)| manhattan_distance_1(*x, *y))
        .sum()
}

/// Euclidean distance for n-dimensional vectors.
///
/// Empty vectors have distance zero.
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have the same size");
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum::<f64>()
        .sqrt()
}

/// Computes the dynamic time warp cost of two sequences.
///
/// Holds a working buffer that survives invocations of [`Dtw::run`].
#[derive(Debug)]
pub struct Dtw {
    buffer: Array2<f64>,
}

impl Dtw {
    /// Creates an instance for sequences of length `a_len` and `b_len`.
    /// Both lengths must be positive.
    pub fn new(a_len: usize, b_len: usize) -> Self {
        assert!(a_len > 0, "first sequence length must be positive");
        assert!(b_len > 0, "second sequence length must be positive");
        Self {
            buffer: Array2::new(a_len, b_len),
        }
    }

    /// Fills the cost matrix for two sequences of length `n` and `m` and
    /// returns the accumulated warp cost.
    ///
    /// `distance(i, j)` must return the cost (>= 0) between element `i` of
    /// the first sequence and element `j` of the second. The sequence
    /// lengths must equal the lengths given to [`Dtw::new`].
    pub fn run<F>(&mut self, n: usize, m: usize, mut distance: F) -> f64
    where
        F: FnMut(usize, usize) -> f64,
    {
        assert_eq!(n, self.buffer.rows(), "first sequence length matches buffer");
        assert_eq!(m, self.buffer.columns(), "second sequence length matches buffer");

        let buf = &mut self.buffer;

        // The rest of the matrix never reads unwritten cells, so no zeroing
        // pass is needed.
        *buf.cell_mut(0, 0) = distance(0, 0);
        for i in 1..n {
            let cost = distance(i, 0) + *buf.cell(i - 1, 0);
            *buf.cell_mut(i, 0) = cost;
        }
        for j in 1..m {
            let cost = distance(0, j) + *buf.cell(0, j - 1);
            *buf.cell_mut(0, j) = cost;
        }

        for i in 1..n {
            for j in 1..m {
                let prev = min3(
                    *buf.cell(i - 1, j),
                    *buf.cell(i, j - 1),
                    *buf.cell(i - 1, j - 1),
                );
                let cost = distance(i, j) + prev;
                *buf.cell_mut(i, j) = cost;
            }
        }

        *buf.cell(n - 1, m - 1)
    }

    /// Runs DTW over two scalar sequences with the given element distance.
    pub fn run_slices<D>(&mut self, a: &[f64], b: &[f64], distance: D) -> f64
    where
        D: Fn(f64, f64) -> f64,
    {
        self.run(a.len(), b.len(), |i, j| distance(a[i], b[j]))
    }

    /// The cost matrix of the last [`Dtw::run`].
    pub fn cost_matrix(&self) -> &Array2<f64> {
        &self.buffer
    }

    /// The warp path of the last [`Dtw::run`].
    pub fn warp_path(&self) -> Vec<(usize, usize)> {
        let mut path = Vec::with_capacity(self.buffer.rows() + self.buffer.columns());
        self.warp_path_into(&mut path);
        path
    }

    /// Stores the warp path of the last [`Dtw::run`] in `path`,
    /// reusing its capacity.
    ///
    /// The path starts at `(0, 0)` and ends at `(n - 1, m - 1)`. When
    /// several predecessors share the minimum cost, the diagonal step is
    /// preferred, then the left one, then the upper one.
    pub fn warp_path_into(&self, path: &mut Vec<(usize, usize)>) {
        path.clear();

        let buf = &self.buffer;
        let mut i = buf.rows() - 1;
        let mut j = buf.columns() - 1;
        path.push((i, j));

        while i > 0 || j > 0 {
            if i == 0 {
                j -= 1;
            } else if j == 0 {
                i -= 1;
            } else {
                let up = *buf.cell(i - 1, j);
                let left = *buf.cell(i, j - 1);
                let diagonal = *buf.cell(i - 1, j - 1);
                let cost = min3(up, left, diagonal);

                if cost == diagonal {
                    i -= 1;
                    j -= 1;
                } else if cost == left {
                    j -= 1;
                } else {
                    i -= 1;
                }
            }
            path.push((i, j));
        }

        path.reverse();
    }
}

#[inline]
fn min3(a: f64, b: f64, c: f64) -> f64 {
    a.min(b).min(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtw_cost() {
        let tests: &[(&[f64], &[f64], f64)] = &[
            (&[0.0, 1.0, 2.0], &[0.0, 1.0, 2.0], 0.0),
            (&[0.0, 1.0, 1.0, 2.0], &[0.0, 1.0, 2.0], 0.0),
            (&[0.0, 1.0, 2.0, 2.0], &[0.0, 1.0, 1.0, 2.0], 0.0),
            (&[0.0, 1.0, 2.0], &[0.0, 2.0, 2.0], 1.0),
            (&[0.0, 2.0], &[0.0, 1.0, 2.0, 3.0, 4.0], 4.0),
            (&[0.0, 1.0, 2.0, 3.0, 4.0], &[0.0, 2.0], 4.0),
            (&[3.0, 0.0, 1.0], &[2.0, 4.0, 2.0, 0.0, 1.0], 3.0),
        ];

        for (a, b, expected) in tests {
            let mut d = Dtw::new(a.len(), b.len());
            let cost = d.run_slices(a, b, manhattan_distance_1);
            assert_eq!(cost, *expected, "for a = {a:?}, b = {b:?}");
        }
    }

    #[test]
    fn dtw_warp_path() {
        let tests: &[(&[f64], &[f64], &[(usize, usize)])] = &[
            (
                &[0.0, 1.0, 2.0],
                &[0.0, 1.0, 2.0],
                &[(0, 0), (1, 1), (2, 2)],
            ),
            (
                &[0.0, 1.0, 1.0, 2.0],
                &[0.0, 1.0, 2.0],
                &[(0, 0), (1, 1), (2, 1), (3, 2)],
            ),
            (
                &[0.0, 1.0, 2.0, 2.0],
                &[0.0, 1.0, 1.0, 2.0],
                &[(0, 0), (1, 1), (1, 2), (2, 3), (3, 3)],
            ),
            (
                &[0.0, 1.0, 2.0],
                &[0.0, 2.0, 2.0],
                &[(0, 0), (1, 1), (2, 2)],
            ),
            (
                &[0.0, 2.0],
                &[0.0, 1.0, 2.0, 3.0, 4.0],
                &[(0, 0), (0, 1), (1, 2), (1, 3), (1, 4)],
            ),
            (
                &[0.0, 1.0, 2.0, 3.0, 4.0],
                &[0.0, 2.0],
                &[(0, 0), (1, 0), (2, 1), (3, 1), (4, 1)],
            ),
            (
                &[3.0, 0.0, 1.0],
                &[2.0, 4.0, 2.0, 0.0, 1.0],
                &[(0, 0), (0, 1), (0, 2), (1, 3), (2, 4)],
            ),
        ];

        for (a, b, expected) in tests {
            let mut d = Dtw::new(a.len(), b.len());
            d.run_slices(a, b, manhattan_distance_1);
            let path = d.warp_path();
            assert_eq!(path, *expected, "for a = {a:?}, b = {b:?}");
        }
    }

    #[test]
    fn dtw_symmetry_and_identity() {
        let a = [1.0, 3.0, 2.0, 5.0];
        let b = [2.0, 2.0, 4.0, 1.0];

        let mut forward = Dtw::new(a.len(), b.len());
        let mut backward = Dtw::new(b.len(), a.len());
        assert_eq!(
            forward.run_slices(&a, &b, manhattan_distance_1),
            backward.run_slices(&b, &a, manhattan_distance_1),
        );

        let mut same = Dtw::new(a.len(), a.len());
        assert_eq!(same.run_slices(&a, &a, manhattan_distance_1), 0.0);
    }

    #[test]
    fn warp_path_steps_are_monotone() {
        let a = [0.3, 0.9, 0.2, 0.7, 0.1];
        let b = [0.5, 0.4, 0.8];
        let mut d = Dtw::new(a.len(), b.len());
        d.run_slices(&a, &b, manhattan_distance_1);

        let path = d.warp_path();
        assert_eq!(path.first(), Some(&(0, 0)));
        assert_eq!(path.last(), Some(&(a.len() - 1, b.len() - 1)));
        for window in path.windows(2) {
            let (i0, j0) = window[0];
            let (i1, j1) = window[1];
            let step = (i1 - i0, j1 - j0);
            assert!(
                step == (0, 1) || step == (1, 0) || step == (1, 1),
                "invalid step {step:?}"
            );
        }
    }

    #[test]
    fn distances() {
        assert_eq!(manhattan_distance_1(3.0, -1.0), 4.0);
        assert_eq!(manhattan_distance(&[1.0, 2.0], &[2.0, 4.0]), 3.0);
        assert_eq!(euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(euclidean_distance(&[], &[]), 0.0);
    }
}
