//! Tileable fractal gradient noise
//!
//! Classic Perlin synthesis over a hashed lattice of unit gradient vectors.
//! Each octave halves the amplitude and doubles the lattice frequency. The
//! scroll axis can be made exactly periodic, so a rendered strip loops onto
//! itself without a seam and an offset of one period reproduces the same
//! field bit for bit.

use crate::field::NoiseField;
use std::f64::consts::TAU;

/// Contrast curve applied to the octave sum before clamping to [0, 1]
const OUTPUT_GAIN: f64 = 1.2;
const OUTPUT_BIAS: f64 = 0.45;

/// Field dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    /// Rows along the scroll axis
    pub rows: usize,
    /// Columns across the matrix
    pub cols: usize,
}

impl Shape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }
}

/// Integer pixel translation into the infinite field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offset {
    pub rows: i64,
    pub cols: i64,
}

impl Offset {
    pub fn new(rows: i64, cols: i64) -> Self {
        Self { rows, cols }
    }

    /// Offset along the scroll axis only
    pub fn scroll(rows: i64) -> Self {
        Self { rows, cols: 0 }
    }
}

/// Quintic fade curve `6t^5 - 15t^4 + 10t^3`
///
/// Value and first derivative are continuous at lattice cell boundaries
/// (fade(0) = 0, fade(1) = 1, fade'(0) = fade'(1) = 0).
#[inline]
pub fn quintic(t: f64) -> f64 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

#[inline]
fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// splitmix64 finalizer
#[inline]
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[inline]
fn lattice_hash(seed: u64, ix: i64, iy: i64) -> u64 {
    let h = mix(seed ^ 0x9E37_79B9_7F4A_7C15);
    let h = mix(h ^ (ix as u64).wrapping_mul(0xD6E8_FEB8_6659_FD93));
    mix(h ^ (iy as u64).wrapping_mul(0xA076_1D64_78BD_642F))
}

/// Per-octave lattice geometry
#[derive(Debug, Clone, Copy)]
struct OctaveGeometry {
    /// Pixels per lattice cell along the scroll axis (non-periodic mode)
    row_cell: f64,
    /// Pixels per lattice cell across the matrix
    col_cell: f64,
    /// Period in pixels and lattice cells per period, when tiling
    tiling: Option<(i64, i64)>,
}

impl OctaveGeometry {
    /// Lattice coordinate of a pixel along the scroll axis
    ///
    /// In tiling mode the pixel is reduced modulo the period with integer
    /// arithmetic first, so pixels one period apart map to identical inputs.
    #[inline]
    fn row_coordinate(&self, pixel: i64) -> f64 {
        match self.tiling {
            Some((period, cells)) => {
                let reduced = pixel.rem_euclid(period);
                reduced as f64 * cells as f64 / period as f64
            }
            None => pixel as f64 / self.row_cell,
        }
    }

    #[inline]
    fn row_lattice_period(&self) -> Option<i64> {
        self.tiling.map(|(_, cells)| cells)
    }
}

/// Seeded fractal Perlin noise generator
#[derive(Debug, Clone)]
pub struct PerlinNoise {
    seed: u64,
    persistence: f64,
    /// Cross-axis cell size relative to the scroll-axis cell size
    aspect: f64,
    /// Base scroll-axis cell size in pixels, defaults to the shorter field side
    cell_size: Option<f64>,
    /// Scroll-axis period in pixels
    repetition_period: Option<u32>,
}

impl PerlinNoise {
    /// Create a generator with persistence 0.5 and square cells
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            persistence: 0.5,
            aspect: 1.0,
            cell_size: None,
            repetition_period: None,
        }
    }

    /// Make the scroll axis repeat every `period` pixels (0 disables tiling)
    pub fn with_repetition_period(mut self, period: u32) -> Self {
        self.repetition_period = (period > 0).then_some(period);
        self
    }

    /// Amplitude multiplier between successive octaves
    pub fn with_persistence(mut self, persistence: f64) -> Self {
        self.persistence = persistence.clamp(0.0, 1.0);
        self
    }

    /// Cross-axis cell size as a fraction of the scroll-axis cell size
    pub fn with_aspect(mut self, aspect: f64) -> Self {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
        self
    }

    /// Override the base cell size in pixels
    pub fn with_cell_size(mut self, cell_size: f64) -> Self {
        if cell_size.is_finite() && cell_size >= 1.0 {
            self.cell_size = Some(cell_size);
        }
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn repetition_period(&self) -> Option<u32> {
        self.repetition_period
    }

    /// Render a window of the field
    ///
    /// Octaves whose cells would be smaller than one pixel are skipped; they
    /// add nothing but aliasing.
    pub fn render(&self, shape: Shape, octaves: u32, offset: Offset) -> NoiseField {
        let Shape { rows, cols } = shape;
        let mut sum = vec![0.0f64; rows * cols];

        let base_cell = self
            .cell_size
            .unwrap_or_else(|| rows.min(cols).max(1) as f64);
        let mut amplitude = 1.0;

        for octave in 0..octaves {
            let Some(geometry) = self.octave_geometry(base_cell, octave) else {
                break;
            };
            let row_period = geometry.row_lattice_period();

            for row in 0..rows {
                let y = geometry.row_coordinate(row as i64 + offset.rows);
                let out = &mut sum[row * cols..(row + 1) * cols];
                for (col, acc) in out.iter_mut().enumerate() {
                    let x = (col as i64 + offset.cols) as f64 / geometry.col_cell;
                    *acc += amplitude * self.gradient_noise(x, y, row_period);
                }
            }

            amplitude *= self.persistence;
        }

        let data = sum
            .into_iter()
            .map(|v| (OUTPUT_GAIN * (v + OUTPUT_BIAS)).clamp(0.0, 1.0) as f32)
            .collect();

        NoiseField::from_parts(rows, cols, data)
    }

    fn octave_geometry(&self, base_cell: f64, octave: u32) -> Option<OctaveGeometry> {
        let scale = 2f64.powi(octave.min(62) as i32);
        let col_cell = base_cell * self.aspect / scale;

        let (row_cell, tiling) = match self.repetition_period {
            Some(period) => {
                let period = period as i64;
                let base_cells = ((period as f64 / base_cell).round() as i64).max(1);
                let cells = base_cells.checked_mul(1i64 << octave.min(40))?;
                (period as f64 / cells as f64, Some((period, cells)))
            }
            None => (base_cell / scale, None),
        };

        if row_cell < 1.0 || col_cell < 1.0 {
            return None;
        }

        Some(OctaveGeometry {
            row_cell,
            col_cell,
            tiling,
        })
    }

    /// Unit gradient for a lattice point
    #[inline]
    fn gradient(&self, ix: i64, iy: i64) -> (f64, f64) {
        let h = lattice_hash(self.seed, ix, iy);
        let angle = (h >> 11) as f64 * (1.0 / (1u64 << 53) as f64) * TAU;
        (angle.cos(), angle.sin())
    }

    /// Single-octave gradient noise at lattice coordinates, roughly in [-0.71, 0.71]
    ///
    /// `x` runs across the matrix, `y` along the scroll axis. With a row
    /// period the y lattice index wraps modulo that many cells.
    fn gradient_noise(&self, x: f64, y: f64, row_period: Option<i64>) -> f64 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;

        let ix = x0 as i64;
        let iy = y0 as i64;
        let (iy0, iy1) = match row_period {
            Some(p) => (iy.rem_euclid(p), (iy + 1).rem_euclid(p)),
            None => (iy, iy + 1),
        };

        let g00 = self.gradient(ix, iy0);
        let g10 = self.gradient(ix + 1, iy0);
        let g01 = self.gradient(ix, iy1);
        let g11 = self.gradient(ix + 1, iy1);

        let n00 = g00.0 * fx + g00.1 * fy;
        let n10 = g10.0 * (fx - 1.0) + g10.1 * fy;
        let n01 = g01.0 * fx + g01.1 * (fy - 1.0);
        let n11 = g11.0 * (fx - 1.0) + g11.1 * (fy - 1.0);

        let u = quintic(fx);
        let v = quintic(fy);

        lerp(lerp(n00, n10, u), lerp(n01, n11, u), v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_in_unit_range() {
        let perlin = PerlinNoise::new(75);
        let field = perlin.render(Shape::new(8, 8), 7, Offset::default());

        assert_eq!(field.rows(), 8);
        assert_eq!(field.cols(), 8);
        assert!(field.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_values_in_unit_range_many_seeds() {
        for seed in 0..32 {
            let perlin = PerlinNoise::new(seed).with_aspect(0.5);
            let field = perlin.render(Shape::new(64, 8), 4, Offset::scroll(seed as i64 * 13));
            let (lo, hi) = field.min_max().unwrap();
            assert!(lo >= 0.0 && hi <= 1.0, "seed {seed}: {lo}..{hi}");
        }
    }

    #[test]
    fn test_field_has_variation() {
        let perlin = PerlinNoise::new(7);
        let field = perlin.render(Shape::new(64, 8), 4, Offset::default());
        let (lo, hi) = field.min_max().unwrap();
        assert!(hi - lo > 0.1);
    }

    #[test]
    fn test_same_seed_identical() {
        let a = PerlinNoise::new(42).render(Shape::new(16, 8), 4, Offset::default());
        let b = PerlinNoise::new(42).render(Shape::new(16, 8), 4, Offset::default());
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = PerlinNoise::new(1).render(Shape::new(16, 8), 4, Offset::default());
        let b = PerlinNoise::new(2).render(Shape::new(16, 8), 4, Offset::default());
        assert_ne!(a, b);
    }

    #[test]
    fn test_periodic_offset_bit_identical() {
        let perlin = PerlinNoise::new(9).with_repetition_period(64);
        let shape = Shape::new(16, 8);

        for start in [0i64, 5, 63, -59] {
            let a = perlin.render(shape, 5, Offset::scroll(start));
            let b = perlin.render(shape, 5, Offset::scroll(start + 64));
            assert_eq!(a.as_slice(), b.as_slice(), "offset {start}");
        }
    }

    #[test]
    fn test_periodic_strip_loops_onto_itself() {
        let perlin = PerlinNoise::new(3)
            .with_repetition_period(48)
            .with_aspect(0.5);
        let strip = perlin.render(Shape::new(48, 8), 4, Offset::default());
        let continued = perlin.render(Shape::new(8, 8), 4, Offset::scroll(48));

        assert_eq!(strip.window(0, 8).unwrap(), continued.as_slice());
    }

    #[test]
    fn test_offset_translates_window() {
        let perlin = PerlinNoise::new(11).with_cell_size(8.0);
        let base = perlin.render(Shape::new(16, 8), 4, Offset::default());
        let shifted = perlin.render(Shape::new(16, 8), 4, Offset::scroll(3));

        assert_eq!(base.window(3, 13).unwrap(), shifted.window(0, 13).unwrap());
    }

    #[test]
    fn test_octaves_below_one_pixel_are_skipped() {
        // 8 px base cell: octaves 4.. would be sub-pixel
        let perlin = PerlinNoise::new(5);
        let four = perlin.render(Shape::new(8, 8), 4, Offset::default());
        let ten = perlin.render(Shape::new(8, 8), 10, Offset::default());
        assert_eq!(four, ten);
    }

    #[test]
    fn test_quintic_endpoints() {
        assert_eq!(quintic(0.0), 0.0);
        assert_eq!(quintic(1.0), 1.0);
        assert!((quintic(0.5) - 0.5).abs() < 1e-12);

        let h = 1e-6;
        let slope_start = (quintic(h) - quintic(0.0)) / h;
        let slope_end = (quintic(1.0) - quintic(1.0 - h)) / h;
        assert!(slope_start.abs() < 1e-6);
        assert!(slope_end.abs() < 1e-6);
    }

    #[test]
    fn test_zero_at_lattice_points() {
        let perlin = PerlinNoise::new(21);
        for ix in -3..3 {
            for iy in -3..3 {
                let n = perlin.gradient_noise(ix as f64, iy as f64, None);
                assert!(n.abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_continuous_across_cell_boundary() {
        let perlin = PerlinNoise::new(33);
        let eps = 1e-7;

        for boundary in [1.0, 2.0, 5.0] {
            let y = 0.37;
            let left = perlin.gradient_noise(boundary - eps, y, None);
            let right = perlin.gradient_noise(boundary + eps, y, None);
            assert!((left - right).abs() < 1e-5, "value jump at x={boundary}");

            let x = 0.61;
            let below = perlin.gradient_noise(x, boundary - eps, None);
            let above = perlin.gradient_noise(x, boundary + eps, None);
            assert!((below - above).abs() < 1e-5, "value jump at y={boundary}");
        }
    }

    #[test]
    fn test_derivative_continuous_across_cell_boundary() {
        let perlin = PerlinNoise::new(34);
        let h = 1e-5;
        let y = 0.42;

        for boundary in [1.0, 4.0] {
            let d_left = (perlin.gradient_noise(boundary, y, None)
                - perlin.gradient_noise(boundary - h, y, None))
                / h;
            let d_right = (perlin.gradient_noise(boundary + h, y, None)
                - perlin.gradient_noise(boundary, y, None))
                / h;
            assert!(
                (d_left - d_right).abs() < 1e-3,
                "slope jump at x={boundary}: {d_left} vs {d_right}"
            );
        }
    }

    #[test]
    fn test_periodic_lattice_wraps() {
        let perlin = PerlinNoise::new(8);
        let a = perlin.gradient_noise(0.3, 0.7, Some(4));
        let b = perlin.gradient_noise(0.3, 4.7, Some(4));
        // y = 4.7 lands in cell 4 == cell 0 modulo 4
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn test_empty_shape() {
        let field = PerlinNoise::new(1).render(Shape::new(0, 8), 4, Offset::default());
        assert_eq!(field.rows(), 0);
        assert!(field.as_slice().is_empty());
    }
}
