//! Viewport resolution: output dimensions and source crop for a target
//! aspect ratio.
//!
//! Crop rectangles are normalized to the source frame: `(0.0, 0.0)` is the
//! top-left corner and `(1.0, 1.0)` the bottom-right.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use reelfx_common::error::{ReelError, ReelResult};

/// Ratios closer than this to the source ratio count as already matching.
pub const ASPECT_EPSILON: f64 = 0.01;

/// Resolve output dimensions for `target_ratio` (width / height).
///
/// Returns the largest centered crop of the source that matches the ratio,
/// never upscaling. `None` keeps the source dimensions.
pub fn resolve(source_w: u32, source_h: u32, target_ratio: Option<f64>) -> ReelResult<(u32, u32)> {
    if source_w == 0 || source_h == 0 {
        return Err(ReelError::config(format!(
            "source dimensions must be positive, got {source_w}x{source_h}"
        )));
    }

    let Some(ratio) = target_ratio else {
        return Ok((source_w, source_h));
    };
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(ReelError::config(format!(
            "aspect ratio must be finite and positive, got {ratio}"
        )));
    }

    let source_ratio = source_w as f64 / source_h as f64;
    if (source_ratio - ratio).abs() <= ASPECT_EPSILON {
        return Ok((source_w, source_h));
    }

    let dims = if source_ratio > ratio {
        let w = (source_h as f64 * ratio).round() as u32;
        (w.clamp(1, source_w), source_h)
    } else {
        let h = (source_w as f64 / ratio).round() as u32;
        (source_w, h.clamp(1, source_h))
    };
    Ok(dims)
}

/// Normalized rectangle of the source that maps onto the output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl CropRect {
    pub const FULL: CropRect = CropRect {
        x: 0.0,
        y: 0.0,
        w: 1.0,
        h: 1.0,
    };

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    /// As a shader `vec4` (`xy` origin, `zw` extent).
    pub fn to_array(self) -> [f32; 4] {
        [self.x, self.y, self.w, self.h]
    }
}

impl Default for CropRect {
    fn default() -> Self {
        Self::FULL
    }
}

/// Centered crop of a `source_w`x`source_h` frame down to `out_w`x`out_h`.
pub fn crop_rect(source_w: u32, source_h: u32, out_w: u32, out_h: u32) -> CropRect {
    if source_w == 0 || source_h == 0 || (out_w, out_h) == (source_w, source_h) {
        return CropRect::FULL;
    }
    let w = (out_w as f32 / source_w as f32).clamp(0.0, 1.0);
    let h = (out_h as f32 / source_h as f32).clamp(0.0, 1.0);
    CropRect {
        x: (1.0 - w) / 2.0,
        y: (1.0 - h) / 2.0,
        w,
        h,
    }
}

/// Aspect ratio presets offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatio {
    /// Keep the source ratio.
    #[default]
    Original,
    Widescreen,
    Vertical,
    Square,
    Standard,
    Portrait,
    Ultrawide,
    Custom { width: u32, height: u32 },
}

impl AspectRatio {
    pub const PRESETS: [AspectRatio; 7] = [
        AspectRatio::Original,
        AspectRatio::Widescreen,
        AspectRatio::Vertical,
        AspectRatio::Square,
        AspectRatio::Standard,
        AspectRatio::Portrait,
        AspectRatio::Ultrawide,
    ];

    /// `(width, height)` terms of the ratio; `None` for [`AspectRatio::Original`].
    pub fn terms(&self) -> Option<(u32, u32)> {
        match *self {
            Self::Original => None,
            Self::Widescreen => Some((16, 9)),
            Self::Vertical => Some((9, 16)),
            Self::Square => Some((1, 1)),
            Self::Standard => Some((4, 3)),
            Self::Portrait => Some((3, 4)),
            Self::Ultrawide => Some((21, 9)),
            Self::Custom { width, height } => Some((width, height)),
        }
    }

    /// Width / height, as taken by [`resolve`].
    pub fn ratio(&self) -> Option<f64> {
        self.terms().map(|(w, h)| w as f64 / h as f64)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.terms() {
            None => f.write_str("original"),
            Some((w, h)) => write!(f, "{w}:{h}"),
        }
    }
}

impl FromStr for AspectRatio {
    type Err = ReelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("original") {
            return Ok(Self::Original);
        }

        let (w, h) = s
            .split_once(':')
            .ok_or_else(|| ReelError::config(format!("aspect ratio '{s}' is not W:H")))?;
        let parse = |term: &str| {
            term.trim()
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| ReelError::config(format!("invalid aspect ratio term '{term}'")))
        };
        let terms = (parse(w)?, parse(h)?);

        Ok(Self::PRESETS
            .into_iter()
            .find(|preset| preset.terms() == Some(terms))
            .unwrap_or(Self::Custom {
                width: terms.0,
                height: terms.1,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_square_crop_of_full_hd() {
        assert_eq!(resolve(1920, 1080, Some(1.0)).unwrap(), (1080, 1080));
    }

    #[test]
    fn test_vertical_crop_of_full_hd() {
        assert_eq!(resolve(1920, 1080, Some(9.0 / 16.0)).unwrap(), (608, 1080));
    }

    #[test]
    fn test_taller_source_crops_height() {
        assert_eq!(resolve(1080, 1920, Some(1.0)).unwrap(), (1080, 1080));
        assert_eq!(resolve(1080, 1920, Some(4.0 / 3.0)).unwrap(), (1080, 810));
    }

    #[test]
    fn test_none_keeps_source() {
        assert_eq!(resolve(640, 480, None).unwrap(), (640, 480));
    }

    #[test]
    fn test_near_match_keeps_source() {
        // 1366x768 is 1.7786, within epsilon of 16:9.
        assert_eq!(resolve(1366, 768, Some(16.0 / 9.0)).unwrap(), (1366, 768));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(resolve(0, 1080, None).is_err());
        assert!(resolve(1920, 0, Some(1.0)).is_err());
        assert!(resolve(1920, 1080, Some(0.0)).is_err());
        assert!(resolve(1920, 1080, Some(-1.0)).is_err());
        assert!(resolve(1920, 1080, Some(f64::NAN)).is_err());
        assert!(resolve(1920, 1080, Some(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_crop_rect_is_centered() {
        let rect = crop_rect(1920, 1080, 1080, 1080);
        assert!((rect.w - 0.5625).abs() < 1e-6);
        assert_eq!(rect.h, 1.0);
        assert!((rect.x - 0.21875).abs() < 1e-6);
        assert_eq!(rect.y, 0.0);
        assert!(crop_rect(640, 480, 640, 480).is_full());
    }

    #[test]
    fn test_parse_aspect_ratio() {
        assert_eq!("16:9".parse::<AspectRatio>().unwrap(), AspectRatio::Widescreen);
        assert_eq!("1:1".parse::<AspectRatio>().unwrap(), AspectRatio::Square);
        assert_eq!("original".parse::<AspectRatio>().unwrap(), AspectRatio::Original);
        assert_eq!(
            "5:4".parse::<AspectRatio>().unwrap(),
            AspectRatio::Custom {
                width: 5,
                height: 4
            }
        );
        assert!("16x9".parse::<AspectRatio>().is_err());
        assert!("0:9".parse::<AspectRatio>().is_err());
        assert_eq!(AspectRatio::Vertical.to_string(), "9:16");
    }

    proptest! {
        #[test]
        fn prop_resolved_matches_ratio_without_upscaling(
            w in 256u32..4096,
            h in 256u32..4096,
            r in 0.5f64..2.0,
        ) {
            let (ow, oh) = resolve(w, h, Some(r)).unwrap();
            prop_assert!(ow <= w);
            prop_assert!(oh <= h);
            prop_assert!((ow as f64 / oh as f64 - r).abs() <= ASPECT_EPSILON);
        }

        #[test]
        fn prop_none_is_identity(w in 1u32..8192, h in 1u32..8192) {
            prop_assert_eq!(resolve(w, h, None).unwrap(), (w, h));
        }
    }
}
