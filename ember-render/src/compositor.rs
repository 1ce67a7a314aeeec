//! Noise window to LED frame

use crate::frame::{Frame, Rgb};
use crate::mask::GradientMask;
use crate::palette::Palette;
use thiserror::Error;

/// Errors that can occur while compositing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComposeError {
    #[error("Noise window has {actual} values, expected {expected} for a {width}x{height} frame")]
    WindowSize {
        expected: usize,
        actual: usize,
        width: usize,
        height: usize,
    },
    #[error("Mask has {mask} rows but the frame has {height}")]
    MaskHeight { mask: usize, height: usize },
}

/// Combines noise, cooling mask, palette and brightness into frames
#[derive(Debug, Clone)]
pub struct FrameCompositor {
    width: usize,
    height: usize,
    mask: GradientMask,
    palette: Palette,
}

impl FrameCompositor {
    pub fn new(
        width: usize,
        height: usize,
        mask: GradientMask,
        palette: Palette,
    ) -> Result<Self, ComposeError> {
        if mask.height() != height {
            return Err(ComposeError::MaskHeight {
                mask: mask.height(),
                height,
            });
        }
        Ok(Self {
            width,
            height,
            mask,
            palette,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of noise values a window must contain
    pub fn window_len(&self) -> usize {
        self.width * self.height
    }

    /// Composite one frame
    ///
    /// `window` is row-major noise of exactly `width * height` values.
    /// `brightness` in [0, 1] scales every channel equally, so hue is kept.
    pub fn compose(&self, window: &[f32], brightness: f32) -> Result<Frame, ComposeError> {
        let expected = self.window_len();
        if window.len() != expected {
            return Err(ComposeError::WindowSize {
                expected,
                actual: window.len(),
                width: self.width,
                height: self.height,
            });
        }

        let brightness = if brightness.is_nan() {
            0.0
        } else {
            brightness.clamp(0.0, 1.0)
        };
        let scale = |c: u8| (c as f32 * brightness).round() as u8;

        let mut pixels = Vec::with_capacity(expected);
        for (row, values) in window.chunks_exact(self.width.max(1)).enumerate() {
            let factor = self.mask.factor(row);
            for &value in values {
                let color = self.palette.map(value * factor);
                pixels.push(Rgb::new(scale(color.r), scale(color.g), scale(color.b)));
            }
        }

        Ok(Frame::from_pixels(self.width, self.height, pixels))
    }

    /// All-zero frame of the compositor's shape
    pub fn black(&self) -> Frame {
        Frame::black(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compositor(width: usize, height: usize) -> FrameCompositor {
        FrameCompositor::new(
            width,
            height,
            GradientMask::quadratic(height, 0.2, 1.2),
            Palette::fire(),
        )
        .unwrap()
    }

    #[test]
    fn test_frame_shape_matches_matrix() {
        let comp = compositor(8, 8);
        let frame = comp.compose(&[0.5; 64], 1.0).unwrap();
        assert_eq!(frame.width(), 8);
        assert_eq!(frame.height(), 8);
        assert_eq!(frame.pixels().len(), 64);
    }

    #[test]
    fn test_window_size_mismatch() {
        let comp = compositor(8, 8);
        let err = comp.compose(&[0.5; 72], 1.0).unwrap_err();
        assert_eq!(
            err,
            ComposeError::WindowSize {
                expected: 64,
                actual: 72,
                width: 8,
                height: 8
            }
        );
    }

    #[test]
    fn test_mask_height_mismatch() {
        let err =
            FrameCompositor::new(8, 8, GradientMask::flat(4, 1.0), Palette::fire()).unwrap_err();
        assert_eq!(err, ComposeError::MaskHeight { mask: 4, height: 8 });
    }

    #[test]
    fn test_zero_brightness_is_black() {
        let comp = compositor(8, 8);
        let frame = comp.compose(&[1.0; 64], 0.0).unwrap();
        assert!(frame.is_black());
    }

    #[test]
    fn test_brightness_scales_channels() {
        let palette = Palette::new(vec![Rgb::new(0, 0, 0), Rgb::new(200, 100, 40)]).unwrap();
        let comp = FrameCompositor::new(1, 1, GradientMask::flat(1, 1.0), palette).unwrap();

        let full = comp.compose(&[1.0], 1.0).unwrap();
        let half = comp.compose(&[1.0], 0.5).unwrap();

        assert_eq!(full.get(0, 0), Some(Rgb::new(200, 100, 40)));
        assert_eq!(half.get(0, 0), Some(Rgb::new(100, 50, 20)));
    }

    #[test]
    fn test_mask_dims_the_tip() {
        let comp = compositor(8, 8);
        let frame = comp.compose(&[0.8; 64], 1.0).unwrap();
        let tip = frame.get(0, 0).unwrap();
        let base = frame.get(7, 0).unwrap();
        assert!(tip.r < base.r);
    }

    #[test]
    fn test_brightness_out_of_range_clamped() {
        let comp = compositor(2, 2);
        let over = comp.compose(&[0.6; 4], 3.0).unwrap();
        let full = comp.compose(&[0.6; 4], 1.0).unwrap();
        assert_eq!(over, full);
        assert!(comp.compose(&[0.6; 4], f32::NAN).unwrap().is_black());
    }
}
