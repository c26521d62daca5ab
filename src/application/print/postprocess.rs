//! Edits applied to a freshly rendered PDF before it is cached.
//!
//! Steps run in a fixed order: dark overlay, final-page removal, title. Each
//! one is deterministic, so the same input always yields the same bytes.

use tracing::warn;

use crate::{
    domain::document::Variant,
    infra::pdf::{FilledRect, PdfDocument, PdfError, Rgb},
};

/// Fill used by the dark overlay; matches the dark theme page background.
pub const OVERLAY_COLOR: Rgb = Rgb::from_hex(0x191919);

/// Height in points of the bands painted at the top and bottom of each page.
pub const OVERLAY_BAND_HEIGHT: f32 = 24.0;

/// Outcome of [`omit_final_page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRemoval {
    Removed { remaining: usize },
    Skipped { page_count: usize },
}

/// Cover the light margins left around dark-mode captures.
pub fn apply_dark_overlay(doc: &mut PdfDocument) -> Result<(), PdfError> {
    for index in 0..doc.page_count() {
        let page = doc.page_box(index)?;
        let band = OVERLAY_BAND_HEIGHT.min(page.height);
        for y in [page.y + page.height - band, page.y] {
            doc.draw_filled_rect(
                index,
                FilledRect {
                    x: page.x,
                    y,
                    width: page.width,
                    height: band,
                    color: OVERLAY_COLOR,
                    opacity: 1.0,
                },
            )?;
        }
    }
    Ok(())
}

/// Drop the trailing page. Documents with fewer than two pages are left as is.
pub fn omit_final_page(doc: &mut PdfDocument) -> Result<PageRemoval, PdfError> {
    let page_count = doc.page_count();
    if page_count <= 1 {
        warn!(
            target = "application::print::postprocess",
            op = "postprocess::omit_final_page",
            result = "skipped",
            page_count,
            "Document too short to drop its final page"
        );
        return Ok(PageRemoval::Skipped { page_count });
    }
    doc.remove_page(page_count - 1)?;
    Ok(PageRemoval::Removed {
        remaining: doc.page_count(),
    })
}

/// Run every step the variant asks for and serialize the result.
pub fn finalize(raw: &[u8], variant: Variant, display_name: &str) -> Result<Vec<u8>, PdfError> {
    let mut doc = PdfDocument::decode(raw)?;
    if variant.dark {
        apply_dark_overlay(&mut doc)?;
    }
    if variant.omit_final_page {
        omit_final_page(&mut doc)?;
    }
    doc.set_title(display_name)?;
    doc.encode()
}
