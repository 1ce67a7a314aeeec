//! Noise field and strip containers

/// Row-major 2D grid of noise values in [0, 1]
///
/// Rows run along the scroll axis, columns across the LED matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseField {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl NoiseField {
    /// Wrap raw values, returning None if the length does not match the shape
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Option<Self> {
        if rows.checked_mul(cols)? != data.len() {
            return None;
        }
        Some(Self { rows, cols, data })
    }

    /// Internal constructor for buffers sized by construction
    pub(crate) fn from_parts(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(rows * cols, data.len());
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Value at (row, col), None when out of bounds
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some(self.data[row * self.cols + col])
    }

    /// One full row
    pub fn row(&self, row: usize) -> Option<&[f32]> {
        self.window(row, 1)
    }

    /// `count` consecutive rows starting at `start`, as one contiguous slice
    pub fn window(&self, start: usize, count: usize) -> Option<&[f32]> {
        let end = start.checked_add(count)?;
        if end > self.rows {
            return None;
        }
        Some(&self.data[start * self.cols..end * self.cols])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Smallest and largest value, None for an empty field
    pub fn min_max(&self) -> Option<(f32, f32)> {
        let mut iter = self.data.iter().copied();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}

/// A long precomputed noise field consumed as a sliding window
#[derive(Debug, Clone)]
pub struct NoiseStrip {
    /// Index of the asset file this strip was read from
    index: usize,
    field: NoiseField,
}

impl NoiseStrip {
    pub fn new(index: usize, field: NoiseField) -> Self {
        Self { index, field }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of rows along the scroll axis
    pub fn len(&self) -> usize {
        self.field.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.field.rows() == 0
    }

    pub fn width(&self) -> usize {
        self.field.cols()
    }

    pub fn window(&self, start: usize, rows: usize) -> Option<&[f32]> {
        self.field.window(start, rows)
    }

    pub fn field(&self) -> &NoiseField {
        &self.field
    }
}
