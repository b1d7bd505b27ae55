//! Frame type and readiness checks.

/// Fraction of dark pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB8 pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Counts decoded snapshots, dark ones included.
    pub sequence: u32,
}

impl Frame {
    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let luma = rgb_to_luma(&self.data);
        if luma.is_empty() {
            return 0.0;
        }
        luma.iter().map(|&b| b as f32).sum::<f32>() / luma.len() as f32
    }
}

/// BT.601 luma of each packed RGB8 pixel. A trailing partial pixel is ignored.
pub fn rgb_to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|p| {
            let y = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
            y.round().clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Check if a frame is dark: true if more than `threshold_pct` of pixels
/// have luma below 32. Cameras deliver such frames while still warming up.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rgb: Vec<u8>, width: u32, height: u32) -> Frame {
        Frame {
            data: rgb,
            width,
            height,
            sequence: 0,
        }
    }

    #[test]
    fn test_rgb_to_luma() {
        let rgb = vec![255, 255, 255, 0, 0, 0, 255, 0, 0];
        assert_eq!(rgb_to_luma(&rgb), vec![255, 0, 76]);
    }

    #[test]
    fn test_rgb_to_luma_ignores_partial_pixel() {
        assert_eq!(rgb_to_luma(&[10, 10, 10, 200]).len(), 1);
    }

    #[test]
    fn test_dark_frame_all_black() {
        let gray = vec![0u8; 1000];
        assert!(is_dark_frame(&gray, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_normal() {
        let gray = vec![128u8; 1000];
        assert!(!is_dark_frame(&gray, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_borderline_bright() {
        // 94% dark, 6% bright → should NOT be dark
        let mut gray = vec![10u8; 940];
        gray.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&gray, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_avg_brightness() {
        let f = frame(vec![100, 100, 100, 200, 200, 200], 2, 1);
        assert!((f.avg_brightness() - 150.0).abs() < 1e-3);
        assert_eq!(frame(vec![], 0, 0).avg_brightness(), 0.0);
    }
}
