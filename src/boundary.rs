//! Locating the bottom edge of content inside a full-page capture
//!
//! Full-page screenshots routinely carry a tall white tail (viewport-height
//! bodies, trailing margins). The detector walks rows from the bottom up and
//! reports where real content ends so the raster can be trimmed before it is
//! embedded in a PDF.

use log::debug;

use crate::RasterCapture;

/// Heuristic constants of the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryConfig {
    /// Sample every n-th column
    pub column_stride: u32,
    /// A channel value below this is perceptibly non-white
    pub channel_threshold: u8,
    /// Percent of sampled pixels that must be content for a content row
    pub min_content_percent: u32,
    /// Consecutive empty rows after content that end the scan
    pub empty_run_limit: u32,
    /// Rows added below the detected content
    pub safety_margin: u32,
    /// Fraction of the height returned for an entirely blank capture
    pub blank_fallback_ratio: f64,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            column_stride: 5,
            channel_threshold: 240,
            min_content_percent: 5,
            empty_run_limit: 50,
            safety_margin: 20,
            blank_fallback_ratio: 0.5,
        }
    }
}

/// Deterministic content-boundary detector
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundaryDetector {
    config: BoundaryConfig,
}

impl BoundaryDetector {
    pub fn new(config: BoundaryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BoundaryConfig {
        &self.config
    }

    /// Row index just past the content, including the safety margin.
    ///
    /// Rows are scanned last to first. `last_content_y` follows the scan, so
    /// it ends on the lowest-index content row reached before the empty-run
    /// limit stops the walk. A capture with no content row at all yields
    /// `floor(height * blank_fallback_ratio)`.
    pub fn find_content_boundary(&self, capture: &RasterCapture) -> u32 {
        let cfg = &self.config;
        let stride = cfg.column_stride.max(1);
        let mut last_content_y: Option<u32> = None;
        let mut empty_run = 0u32;

        for y in (0..capture.height).rev() {
            if self.is_content_row(capture, y, stride) {
                last_content_y = Some(y);
                empty_run = 0;
            } else {
                empty_run += 1;
                if last_content_y.is_some() && empty_run >= cfg.empty_run_limit {
                    break;
                }
            }
        }

        match last_content_y {
            Some(y) => {
                debug!(
                    "content ends at row {} of {} (+{} margin)",
                    y, capture.height, cfg.safety_margin
                );
                y + cfg.safety_margin
            }
            None => {
                debug!("no content rows in {}px capture, using fallback", capture.height);
                (capture.height as f64 * cfg.blank_fallback_ratio).floor() as u32
            }
        }
    }

    fn is_content_row(&self, capture: &RasterCapture, y: u32, stride: u32) -> bool {
        let threshold = self.config.channel_threshold;
        let mut sampled = 0u32;
        let mut content = 0u32;
        let mut x = 0;
        while x < capture.width {
            sampled += 1;
            if capture.rgb_at(x, y).iter().any(|&c| c < threshold) {
                content += 1;
            }
            x += stride;
        }
        sampled > 0 && content * 100 >= sampled * self.config.min_content_percent
    }
}

/// [`BoundaryDetector::find_content_boundary`] with default constants.
pub fn find_content_boundary(capture: &RasterCapture) -> u32 {
    BoundaryDetector::default().find_content_boundary(capture)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white(width: u32, height: u32) -> RasterCapture {
        RasterCapture::new(width, height, 3, vec![255; (width * height * 3) as usize]).unwrap()
    }

    fn paint_row(img: &mut RasterCapture, y: u32, value: u8) {
        let ch = img.channels as usize;
        let start = y as usize * img.width as usize * ch;
        let end = start + img.width as usize * ch;
        img.pixels[start..end].fill(value);
    }

    #[test]
    fn blank_capture_falls_back_to_half_height() {
        assert_eq!(find_content_boundary(&white(40, 301)), 150);
        assert_eq!(find_content_boundary(&white(40, 1)), 0);
    }

    #[test]
    fn single_black_row_gets_margin() {
        let mut img = white(100, 400);
        paint_row(&mut img, 120, 0);
        assert_eq!(find_content_boundary(&img), 140);
    }

    #[test]
    fn content_in_first_row_is_found() {
        let mut img = white(100, 10);
        paint_row(&mut img, 0, 0);
        assert_eq!(find_content_boundary(&img), 20);
    }

    #[test]
    fn near_white_is_not_content() {
        let mut img = white(100, 200);
        paint_row(&mut img, 50, 241);
        assert_eq!(find_content_boundary(&img), 100);
    }

    #[test]
    fn sparse_row_below_threshold_is_ignored() {
        // 20 samples per row; one dark sample is 5%, none is 0%.
        let mut img = white(100, 200);
        let idx = (60 * 100) * 3;
        img.pixels[idx..idx + 3].fill(0);
        assert_eq!(find_content_boundary(&img), 80);

        let mut img = white(100, 200);
        let idx = (60 * 100 + 1) * 3;
        img.pixels[idx..idx + 3].fill(0);
        assert_eq!(find_content_boundary(&img), 100);
    }

    #[test]
    fn upward_scan_stops_after_empty_run() {
        let mut img = white(50, 500);
        paint_row(&mut img, 10, 0);
        paint_row(&mut img, 300, 0);
        // Row 10 sits more than 50 empty rows above row 300.
        assert_eq!(find_content_boundary(&img), 320);

        paint_row(&mut img, 260, 0);
        assert_eq!(find_content_boundary(&img), 280);
    }

    #[test]
    fn custom_constants_are_honored() {
        let mut img = white(100, 100);
        paint_row(&mut img, 30, 0);
        let detector = BoundaryDetector::new(BoundaryConfig {
            safety_margin: 0,
            ..Default::default()
        });
        assert_eq!(detector.find_content_boundary(&img), 30);
    }

    #[test]
    fn rgba_and_gray_captures() {
        let mut rgba = RasterCapture::new(20, 80, 4, vec![255; 20 * 80 * 4]).unwrap();
        paint_row(&mut rgba, 5, 0);
        assert_eq!(find_content_boundary(&rgba), 25);

        let mut gray = RasterCapture::new(20, 80, 1, vec![255; 20 * 80]).unwrap();
        paint_row(&mut gray, 7, 100);
        assert_eq!(find_content_boundary(&gray), 27);
    }
}
