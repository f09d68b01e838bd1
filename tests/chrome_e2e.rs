//! End-to-end tests against a real Chrome
//!
//! Run with `cargo test -- --ignored` on a machine with Chrome installed.

#![cfg(feature = "cdp")]

use std::time::Duration;

use html2pdf_render::assemble::count_pages;
use html2pdf_render::cdp::{ChromeLauncher, ChromeSession};
use html2pdf_render::{
    CancelToken, ConversionRequest, Converter, Error, Launcher, PageFormat, RenderConfig,
    RenderEngine,
};

/// A4 at 96 CSS px per inch.
const A4_HEIGHT_PX: u32 = 1123;

fn block_document(height_px: u32) -> String {
    format!(
        "<html><head></head><body><div style=\"height:{}px;background:#333\"></div></body></html>",
        height_px
    )
}

#[test]
#[ignore] // Requires Chrome to be installed
fn paged_output_follows_native_pagination() {
    let converter = Converter::new(ChromeLauncher, RenderConfig::default());
    for (height, pages) in [(A4_HEIGHT_PX - 20, 1usize), (2 * A4_HEIGHT_PX - 20, 2)] {
        let request = ConversionRequest::new(block_document(height), PageFormat::Paged);
        let pdf = converter.convert(&request, &CancelToken::new()).unwrap();
        assert_eq!(count_pages(&pdf.bytes).unwrap(), pages);
        assert_eq!(pdf.page_count, pages);
    }
}

#[test]
#[ignore] // Requires Chrome to be installed
fn continuous_output_is_single_page() {
    let converter = Converter::new(ChromeLauncher, RenderConfig::default());
    let request = ConversionRequest::new(block_document(3 * A4_HEIGHT_PX), PageFormat::Continuous);
    let pdf = converter.convert(&request, &CancelToken::new()).unwrap();
    assert_eq!(count_pages(&pdf.bytes).unwrap(), 1);
}

#[test]
#[ignore] // Requires Chrome to be installed
fn close_twice_is_safe() {
    let mut session: ChromeSession = ChromeLauncher.launch(&RenderConfig::default()).unwrap();
    assert!(session.process_id().is_some());
    session
        .open("<p>hi</p>", Duration::from_secs(30), &CancelToken::new())
        .unwrap();
    assert!(session.measure_content_height().unwrap() > 0);
    session.close().unwrap();
    session.close().unwrap();
    assert!(matches!(session.screenshot(), Err(Error::SessionClosed)));
}
