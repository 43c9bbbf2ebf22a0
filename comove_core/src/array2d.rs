//! Row-major 2-D arrays with row slices and strided column views.
//!
//! Every pipeline matrix (trace rows, feature vectors, DTW cost matrices)
//! is stored as one contiguous row-major block. Rows are plain slices;
//! columns are strided views with a fixed distance of `columns` between
//! consecutive elements.

use serde::{Deserialize, Serialize};

/// A dense 2-D array stored in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawArray2<T>")]
pub struct Array2<T> {
    rows: usize,
    columns: usize,
    data: Vec<T>,
}

/// Untrusted shape used during deserialization.
#[derive(Deserialize)]
struct RawArray2<T> {
    rows: usize,
    columns: usize,
    data: Vec<T>,
}

impl<T> TryFrom<RawArray2<T>> for Array2<T> {
    type Error = String;

    fn try_from(raw: RawArray2<T>) -> Result<Self, String> {
        if raw.rows.checked_mul(raw.columns) != Some(raw.data.len()) {
            return Err(format!(
                "array shape {}x{} does not match {} cells",
                raw.rows,
                raw.columns,
                raw.data.len()
            ));
        }
        Ok(Array2 {
            rows: raw.rows,
            columns: raw.columns,
            data: raw.data,
        })
    }
}

impl<T: Clone + Default> Array2<T> {
    /// Creates an array of the given dimensions filled with `T::default()`.
    pub fn new(rows: usize, columns: usize) -> Self {
        Self::filled(rows, columns, T::default())
    }

    /// Creates an array of the given dimensions filled with `value`.
    pub fn filled(rows: usize, columns: usize, value: T) -> Self {
        Self {
            rows,
            columns,
            data: vec![value; rows * columns],
        }
    }
}

impl<T> Array2<T> {
    /// Creates an array from a row-major cell vector.
    ///
    /// The vector length must equal `rows * columns`.
    pub fn from_vec(data: Vec<T>, rows: usize, columns: usize) -> Self {
        assert_eq!(data.len(), rows * columns, "cell count matches dimensions");
        Self {
            rows,
            columns,
            data,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Total number of cells.
    pub fn cells(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn cell(&self, row: usize, column: usize) -> &T {
        assert!(row < self.rows, "valid row index");
        assert!(column < self.columns, "valid column index");
        &self.data[row * self.columns + column]
    }

    pub fn cell_mut(&mut self, row: usize, column: usize) -> &mut T {
        assert!(row < self.rows, "valid row index");
        assert!(column < self.columns, "valid column index");
        &mut self.data[row * self.columns + column]
    }

    /// A contiguous view of one row.
    pub fn row(&self, row: usize) -> &[T] {
        assert!(row < self.rows, "valid row index");
        let start = row * self.columns;
        &self.data[start..start + self.columns]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        assert!(row < self.rows, "valid row index");
        let start = row * self.columns;
        &mut self.data[start..start + self.columns]
    }

    /// A strided view of one column (stride == number of columns).
    pub fn column(&self, column: usize) -> ColumnView<'_, T> {
        assert!(column < self.columns, "valid column index");
        ColumnView {
            data: &self.data,
            offset: column,
            stride: self.columns,
            len: self.rows,
        }
    }

    /// Iterates over all cells in row-major order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.data.iter_mut()
    }
}

impl<T: Clone + Default> Default for Array2<T> {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// A borrowed view of a single column.
#[derive(Debug, Clone, Copy)]
pub struct ColumnView<'a, T> {
    data: &'a [T],
    offset: usize,
    stride: usize,
    len: usize,
}

impl<'a, T> ColumnView<'a, T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> &'a T {
        assert!(index < self.len, "valid column element index");
        &self.data[self.offset + index * self.stride]
    }

    /// A sub-view starting at `start` with `len` elements.
    pub fn slice(&self, start: usize, len: usize) -> ColumnView<'a, T> {
        assert!(start + len <= self.len, "slice in range");
        ColumnView {
            data: self.data,
            offset: self.offset + start * self.stride,
            stride: self.stride,
            len,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a T> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions() {
        let empty: Array2<i32> = Array2::new(0, 0);
        assert!(empty.is_empty());
        assert_eq!(empty.cells(), 0);

        let a: Array2<i32> = Array2::new(2, 3);
        assert!(!a.is_empty());
        assert_eq!(a.cells(), 6);
        assert_eq!(a.rows(), 2);
        assert_eq!(a.columns(), 3);
        assert_eq!(*a.cell(1, 1), 0);
    }

    #[test]
    fn contents_row_major() {
        let a = Array2::from_vec(vec![1, 2, 3, 4, 5, 6], 2, 3);
        assert!(a.iter().copied().eq([1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn row_views() {
        let a = Array2::from_vec(vec![1, 2, 3, 4, 5, 6], 2, 3);
        assert_eq!(a.row(0), &[1, 2, 3]);
        assert_eq!(a.row(1), &[4, 5, 6]);
    }

    #[test]
    fn column_views() {
        let a = Array2::from_vec(vec![1, 2, 3, 4, 5, 6], 2, 3);

        let first = a.column(0);
        assert_eq!(first.len(), 2);
        assert!(first.iter().copied().eq([1, 4]));

        let last = a.column(2);
        assert!(last.iter().copied().eq([3, 6]));
    }

    #[test]
    fn column_slicing() {
        let a = Array2::from_vec(vec![1, 2, 3, 4, 5, 6, 7, 8, 9], 3, 3);
        let col = a.column(2).slice(1, 2);
        assert_eq!(col.len(), 2);
        assert!(col.iter().copied().eq([6, 9]));
    }

    #[test]
    fn serde_round_trip() {
        let a = Array2::from_vec(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 8, 7, 6], 4, 3);
        let json = serde_json::to_string(&a).unwrap();
        let back: Array2<i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }

    #[test]
    fn serde_rejects_bad_shape() {
        let json = r#"{"rows": 2, "columns": 3, "data": [1, 2, 3]}"#;
        assert!(serde_json::from_str::<Array2<i32>>(json).is_err());
    }
}
