use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::{info, warn};
use url::Url;

use crate::{
    domain::document::{DEFAULT_DISPLAY_NAME, DocumentId, NormalizedRequest},
    infra::pdf::PdfDocument,
};

use super::{
    postprocess,
    types::{
        CAPTURE_LAYOUT, DocumentRenderer, PrintError, RenderArtifact, RenderTarget, RendererError,
    },
};

const METRIC_RENDER: &str = "docprint_render_total";
const METRIC_RENDER_FAILED: &str = "docprint_render_failed_total";
const METRIC_RENDER_MS: &str = "docprint_render_ms";

/// Drives the renderer and post-processes what it returns.
pub struct RenderEngine {
    renderer: Arc<dyn DocumentRenderer>,
    base_url: Url,
}

impl RenderEngine {
    pub fn new(renderer: Arc<dyn DocumentRenderer>, base_url: Url) -> Self {
        Self { renderer, base_url }
    }

    /// Where the document with `id` is published.
    pub fn locator(&self, id: &DocumentId) -> Result<Url, RendererError> {
        self.base_url
            .join(id.as_str())
            .map_err(|err| RendererError::Locator(err.to_string()))
    }

    pub async fn render(&self, request: &NormalizedRequest) -> Result<RenderArtifact, PrintError> {
        let started_at = Instant::now();
        let target = RenderTarget {
            locator: self
                .locator(&request.document_id)
                .map_err(PrintError::RenderFailure)?,
            dark_mode: request.variant.dark,
            layout: CAPTURE_LAYOUT,
        };

        counter!(METRIC_RENDER).increment(1);
        let rendered = match self.renderer.render(&target).await {
            Ok(rendered) => rendered,
            Err(err) => {
                counter!(METRIC_RENDER_FAILED).increment(1);
                warn!(
                    target = "application::print::engine",
                    op = "engine::render",
                    result = "render_error",
                    document_id = %request.document_id,
                    locator = %target.locator,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Document renderer failed"
                );
                return Err(PrintError::RenderFailure(err));
            }
        };
        let render_elapsed_ms = started_at.elapsed().as_millis() as u64;

        let display_name = display_name_from(rendered.title.as_deref());
        let variant = request.variant;
        let name = display_name.clone();
        let raw = rendered.pdf;
        let finalized =
            tokio::task::spawn_blocking(move || postprocess::finalize(&raw, variant, &name))
                .await
                .map_err(|err| PrintError::aborted(err.to_string()))?;
        let bytes = match finalized {
            Ok(bytes) => bytes,
            Err(err) => {
                counter!(METRIC_RENDER_FAILED).increment(1);
                warn!(
                    target = "application::print::engine",
                    op = "engine::render",
                    result = "postprocess_error",
                    document_id = %request.document_id,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "PDF post-processing failed"
                );
                return Err(PrintError::PostProcessFailure(err));
            }
        };

        let elapsed = started_at.elapsed();
        histogram!(METRIC_RENDER_MS).record(elapsed.as_secs_f64() * 1000.0);
        info!(
            target = "application::print::engine",
            op = "engine::render",
            result = "rendered",
            document_id = %request.document_id,
            dark = variant.dark,
            omit_final_page = variant.omit_final_page,
            elapsed_ms = elapsed.as_millis() as u64,
            render_elapsed_ms,
            pdf_bytes = bytes.len(),
            "Document rendered"
        );

        Ok(RenderArtifact {
            bytes: Bytes::from(bytes),
            display_name,
        })
    }
}

/// Display name for a title evaluated from the live document.
pub fn display_name_from(title: Option<&str>) -> String {
    title
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or(DEFAULT_DISPLAY_NAME)
        .to_string()
}

/// Display name recovered from a cached PDF's embedded title.
pub fn display_name_of(pdf: &[u8]) -> String {
    let title = PdfDocument::decode(pdf).ok().and_then(|doc| doc.title());
    display_name_from(title.as_deref())
}
