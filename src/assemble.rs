//! PDF assembly
//!
//! Paged output is the engine's own print result. Continuous output is a
//! single page holding the trimmed full-page screenshot. The page is A4 wide
//! and one embedded pixel maps to the same number of points on both axes.

use image::{DynamicImage, ImageBuffer, RgbImage};
use log::{debug, info, warn};
use lopdf::{dictionary, Document as LoDocument, Object as LoObject, Stream as LoStream};

use crate::boundary::BoundaryDetector;
use crate::{Error, PageFormat, PrintLayout, RasterCapture, RenderConfig, RenderEngine, Result};

/// A4 width in PDF points.
pub const A4_WIDTH_PT: f32 = 595.0;

/// A finished PDF document
#[derive(Debug, Clone)]
pub struct PdfOutput {
    pub bytes: Vec<u8>,
    pub page_format: PageFormat,
    pub page_count: usize,
}

impl PdfOutput {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Geometry of the single continuous page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuousLayout {
    /// Page width in points
    pub page_width_pt: f32,
    /// Widest slice of a capture that is embedded
    pub raster_width_px: u32,
}

impl ContinuousLayout {
    pub fn for_config(config: &RenderConfig) -> Self {
        Self {
            page_width_pt: A4_WIDTH_PT,
            raster_width_px: config.raster_width(),
        }
    }

    /// Embedded width for a capture `capture_width` pixels wide.
    pub fn crop_width(&self, capture_width: u32) -> u32 {
        self.raster_width_px.min(capture_width).max(1)
    }

    /// Points per pixel when an image `width_px` wide fills the page width.
    pub fn points_per_pixel(&self, width_px: u32) -> f32 {
        self.page_width_pt / width_px.max(1) as f32
    }

    /// Page height in points for an embedded image of `width_px`×`rows`.
    pub fn page_height_pt(&self, width_px: u32, rows: u32) -> f32 {
        rows as f32 * self.points_per_pixel(width_px)
    }
}

/// Builds the output document from a loaded render session
#[derive(Debug, Clone)]
pub struct PdfAssembler {
    layout: ContinuousLayout,
    print: PrintLayout,
    detector: BoundaryDetector,
}

impl PdfAssembler {
    pub fn new(config: &RenderConfig, detector: BoundaryDetector) -> Self {
        Self {
            layout: ContinuousLayout::for_config(config),
            print: PrintLayout::a4(),
            detector,
        }
    }

    pub fn layout(&self) -> &ContinuousLayout {
        &self.layout
    }

    pub fn assemble<E: RenderEngine + ?Sized>(&self, engine: &E, format: PageFormat) -> Result<PdfOutput> {
        match format {
            PageFormat::Paged => self.paged(engine),
            PageFormat::Continuous => self.continuous(engine),
        }
    }

    fn paged<E: RenderEngine + ?Sized>(&self, engine: &E) -> Result<PdfOutput> {
        let bytes = engine.render_pdf(&self.print)?;
        let page_count = match count_pages(&bytes) {
            Ok(n) => n,
            Err(e) => {
                warn!("Could not count pages of engine PDF: {}", e);
                0
            }
        };
        info!("PDF generated: {} bytes, {} pages", bytes.len(), page_count);
        Ok(PdfOutput {
            bytes,
            page_format: PageFormat::Paged,
            page_count,
        })
    }

    fn continuous<E: RenderEngine + ?Sized>(&self, engine: &E) -> Result<PdfOutput> {
        let measured = engine.measure_content_height()?;
        debug!("content height measured: {}px", measured);

        let capture = engine.screenshot()?;
        let bytes = self.single_page_from_capture(&capture)?;
        Ok(PdfOutput {
            bytes,
            page_format: PageFormat::Continuous,
            page_count: 1,
        })
    }

    /// Trim `capture` at its content boundary and wrap it in a one-page PDF.
    pub fn single_page_from_capture(&self, capture: &RasterCapture) -> Result<Vec<u8>> {
        let boundary = self.detector.find_content_boundary(capture);
        let rows = boundary.min(capture.height).max(1);
        let width = self.layout.crop_width(capture.width);
        info!(
            "Trimming {}x{} capture to {}x{} (boundary {})",
            capture.width, capture.height, width, rows, boundary
        );

        let trimmed = crop_to_rgb(capture, width, rows)?;
        let height_pt = self.layout.page_height_pt(width, rows);
        let bytes = image_page_pdf(&trimmed, self.layout.page_width_pt, height_pt)?;
        info!(
            "PDF generated: {} bytes, {:.0}x{:.0} points",
            bytes.len(),
            self.layout.page_width_pt,
            height_pt
        );
        Ok(bytes)
    }
}

/// Top-left `width`×`rows` region of `capture` as RGB.
fn crop_to_rgb(capture: &RasterCapture, width: u32, rows: u32) -> Result<RgbImage> {
    let invalid = || Error::Assembly("screenshot buffer does not match its dimensions".into());
    let image = match capture.channels {
        1 => DynamicImage::ImageLuma8(
            ImageBuffer::from_raw(capture.width, capture.height, capture.pixels.clone()).ok_or_else(invalid)?,
        ),
        2 => DynamicImage::ImageLumaA8(
            ImageBuffer::from_raw(capture.width, capture.height, capture.pixels.clone()).ok_or_else(invalid)?,
        ),
        3 => DynamicImage::ImageRgb8(
            ImageBuffer::from_raw(capture.width, capture.height, capture.pixels.clone()).ok_or_else(invalid)?,
        ),
        4 => DynamicImage::ImageRgba8(
            ImageBuffer::from_raw(capture.width, capture.height, capture.pixels.clone()).ok_or_else(invalid)?,
        ),
        n => return Err(Error::Assembly(format!("unsupported channel count {}", n))),
    };
    Ok(image.crop_imm(0, 0, width, rows).to_rgb8())
}

/// A one-page PDF with `image` stretched over a `width_pt`×`height_pt` page.
pub fn image_page_pdf(image: &RgbImage, width_pt: f32, height_pt: f32) -> Result<Vec<u8>> {
    let (px_w, px_h) = image.dimensions();
    let mut doc = LoDocument::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image_id = doc.add_object(LoStream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => px_w as i64,
            "Height" => px_h as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        image.as_raw().clone(),
    ));
    let content = format!("q\n{} 0 0 {} 0 0 cm\n/Im0 Do\nQ\n", width_pt, height_pt).into_bytes();
    let content_id = doc.add_object(LoStream::new(lopdf::Dictionary::new(), content));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
        "MediaBox" => vec![0.into(), 0.into(), width_pt.into(), height_pt.into()],
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, LoObject::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| Error::Assembly(format!("Failed to serialize PDF: {}", e)))?;
    Ok(out)
}

/// Number of pages in a serialized PDF.
pub fn count_pages(bytes: &[u8]) -> Result<usize> {
    let doc = LoDocument::load_mem(bytes)
        .map_err(|e| Error::Assembly(format!("engine produced an unreadable PDF: {}", e)))?;
    Ok(doc.get_pages().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture_with_rows(width: u32, height: u32, dark_rows: &[u32]) -> RasterCapture {
        let mut pixels = vec![255u8; (width * height * 4) as usize];
        for &y in dark_rows {
            let start = (y * width * 4) as usize;
            pixels[start..start + (width * 4) as usize].fill(0);
        }
        RasterCapture::new(width, height, 4, pixels).unwrap()
    }

    fn media_box(bytes: &[u8]) -> Vec<f32> {
        let doc = LoDocument::load_mem(bytes).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        page.get(b"MediaBox")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o.as_float().unwrap())
            .collect()
    }

    #[test]
    fn points_per_pixel_follows_embedded_width() {
        let layout = ContinuousLayout::for_config(&RenderConfig::default());
        assert_eq!(layout.raster_width_px, 3840);
        assert_eq!(layout.crop_width(5000), 3840);
        assert_eq!(layout.crop_width(1920), 1920);
        assert!((layout.page_height_pt(3840, 3840) - A4_WIDTH_PT).abs() < 1e-3);
        assert!((layout.page_height_pt(3840, 1920) - A4_WIDTH_PT / 2.0).abs() < 1e-3);
        assert!((layout.page_height_pt(1920, 1920) - A4_WIDTH_PT).abs() < 1e-3);
    }

    #[test]
    fn narrow_capture_keeps_aspect_ratio() {
        let config = RenderConfig {
            viewport: crate::Viewport { width: 100, height: 30 },
            ..Default::default()
        };
        let assembler = PdfAssembler::new(&config, BoundaryDetector::default());
        // Configured for 200 device pixels, the engine delivered 100.
        let capture = capture_with_rows(100, 300, &[99]);
        let bytes = assembler.single_page_from_capture(&capture).unwrap();

        let mb = media_box(&bytes);
        let page_ratio = mb[3] / mb[2];
        let image_ratio = 119.0 / 100.0;
        assert!((page_ratio - image_ratio).abs() < 1e-3, "{} vs {}", page_ratio, image_ratio);
    }

    #[test]
    fn continuous_page_is_single_and_trimmed() {
        let config = RenderConfig {
            viewport: crate::Viewport { width: 40, height: 30 },
            ..Default::default()
        };
        let assembler = PdfAssembler::new(&config, BoundaryDetector::default());
        let capture = capture_with_rows(80, 600, &[100]);
        let bytes = assembler.single_page_from_capture(&capture).unwrap();

        assert_eq!(count_pages(&bytes).unwrap(), 1);
        let mb = media_box(&bytes);
        assert!((mb[2] - A4_WIDTH_PT).abs() < 1e-3);
        let expected_h = 120.0 * A4_WIDTH_PT / 80.0;
        assert!((mb[3] - expected_h).abs() < 1e-2, "height {} vs {}", mb[3], expected_h);
    }

    #[test]
    fn boundary_past_bottom_is_clamped() {
        let config = RenderConfig {
            viewport: crate::Viewport { width: 10, height: 10 },
            device_scale_factor: 1,
            ..Default::default()
        };
        let assembler = PdfAssembler::new(&config, BoundaryDetector::default());
        let capture = capture_with_rows(10, 30, &[25]);
        let bytes = assembler.single_page_from_capture(&capture).unwrap();
        let mb = media_box(&bytes);
        assert!((mb[3] - 30.0 * A4_WIDTH_PT / 10.0).abs() < 1e-2);
    }

    #[test]
    fn image_stream_matches_crop() {
        let img = RgbImage::from_pixel(7, 3, image::Rgb([10, 20, 30]));
        let bytes = image_page_pdf(&img, 100.0, 50.0).unwrap();
        let doc = LoDocument::load_mem(&bytes).unwrap();
        let found = doc.objects.values().any(|obj| match obj {
            LoObject::Stream(s) => {
                s.dict.get(b"Subtype").ok().and_then(|v| v.as_name().ok()) == Some(&b"Image"[..])
                    && s.dict.get(b"Width").ok().and_then(|v| v.as_i64().ok()) == Some(7)
                    && s.dict.get(b"Height").ok().and_then(|v| v.as_i64().ok()) == Some(3)
            }
            _ => false,
        });
        assert!(found);
    }

    struct PrintOnly(Vec<u8>);

    impl RenderEngine for PrintOnly {
        fn open(&mut self, _: &str, _: std::time::Duration, _: &crate::CancelToken) -> Result<()> {
            Ok(())
        }

        fn measure_content_height(&self) -> Result<u32> {
            Ok(0)
        }

        fn screenshot(&self) -> Result<RasterCapture> {
            Err(Error::Render("not used".into()))
        }

        fn render_pdf(&self, _layout: &PrintLayout) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unreadable_engine_pdf_is_an_assembly_error() {
        assert!(matches!(count_pages(b"not a pdf"), Err(Error::Assembly(_))));
    }

    #[test]
    fn paged_bytes_pass_through_even_when_uncountable() {
        let assembler = PdfAssembler::new(&RenderConfig::default(), BoundaryDetector::default());
        let engine = PrintOnly(b"%PDF-1.7 truncated".to_vec());
        let pdf = assembler.assemble(&engine, PageFormat::Paged).unwrap();
        assert_eq!(pdf.bytes, b"%PDF-1.7 truncated");
        assert_eq!(pdf.page_count, 0);
    }
}
