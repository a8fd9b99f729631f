//! PDF rasterisation: render every page to a [`PageInput`] via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto the blocking
//! thread pool so Tokio workers never stall during CPU-heavy rendering.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded and staying inside
//! the image-size sweet spot for vision models.

use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::ExtractError;

/// One rendered page: raster image plus the embedded text layer.
///
/// Immutable for the duration of processing; every downstream stage
/// borrows it.
#[derive(Debug, Clone)]
pub struct PageInput {
    /// 0-based page index. All results are keyed by this.
    pub page_index: usize,
    pub page_width: u32,
    pub page_height: u32,
    pub image: DynamicImage,
    /// Embedded PDF text for this page; empty for scanned documents.
    pub text: String,
}

/// Rasterise all pages of a PDF into [`PageInput`]s.
///
/// Runs inside `spawn_blocking` since pdfium operations are CPU-bound.
/// A page that fails to render is skipped with a warning and reported in
/// the second element; sibling pages are unaffected.
pub async fn render_pages(
    pdf_path: &Path,
    config: &PipelineConfig,
) -> Result<(Vec<PageInput>, Vec<(usize, String)>), ExtractError> {
    if !pdf_path.exists() {
        return Err(ExtractError::FileNotFound {
            path: pdf_path.to_path_buf(),
        });
    }

    let path = pdf_path.to_path_buf();
    let max_pixels = config.max_rendered_pixels;

    tokio::task::spawn_blocking(move || render_pages_blocking(&path, max_pixels))
        .await
        .map_err(|e| ExtractError::Internal(format!("render task panicked: {e}")))?
}

/// Blocking implementation of page rendering.
fn render_pages_blocking(
    pdf_path: &Path,
    max_pixels: u32,
) -> Result<(Vec<PageInput>, Vec<(usize, String)>), ExtractError> {
    let pdfium = Pdfium::default();

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| ExtractError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{e:?}"),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut rendered = Vec::with_capacity(total_pages);
    let mut failures = Vec::new();

    for idx in 0..total_pages {
        let page = match pages.get(idx as u16) {
            Ok(page) => page,
            Err(e) => {
                warn!("skipping page {}: {e:?}", idx + 1);
                failures.push((idx, format!("{e:?}")));
                continue;
            }
        };

        let bitmap = match page.render_with_config(&render_config) {
            Ok(bitmap) => bitmap,
            Err(e) => {
                warn!("rasterisation failed for page {}: {e:?}", idx + 1);
                failures.push((idx, format!("{e:?}")));
                continue;
            }
        };

        let image = bitmap.as_image();
        let text = page.text().map(|t| t.all()).unwrap_or_default();
        debug!(
            "rendered page {} → {}x{} px, {} chars of text",
            idx + 1,
            image.width(),
            image.height(),
            text.len()
        );

        rendered.push(PageInput {
            page_index: idx,
            page_width: image.width(),
            page_height: image.height(),
            image,
            text,
        });
    }

    Ok((rendered, failures))
}
