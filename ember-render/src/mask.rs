//! Vertical cooling mask
//!
//! Flames cool as they rise: each row's noise is scaled by a per-row factor
//! that grows quadratically from the tip (row 0) to the base.

/// Per-row intensity multipliers
#[derive(Debug, Clone, PartialEq)]
pub struct GradientMask {
    rows: Vec<f32>,
}

impl GradientMask {
    /// Quadratic mask `near + (far - near) * (row / height)^2`
    ///
    /// `near` applies at row 0 (flame tip), values approach `far` at the base.
    pub fn quadratic(height: usize, near: f32, far: f32) -> Self {
        let rows = (0..height)
            .map(|row| {
                let t = row as f32 / height as f32;
                near + (far - near) * t * t
            })
            .collect();
        Self { rows }
    }

    /// Uniform mask, every row scaled by `value`
    pub fn flat(height: usize, value: f32) -> Self {
        Self {
            rows: vec![value; height],
        }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn factor(&self, row: usize) -> f32 {
        self.rows.get(row).copied().unwrap_or(0.0)
    }

    pub fn factors(&self) -> &[f32] {
        &self.rows
    }
}
