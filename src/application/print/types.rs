use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

use crate::{domain::error::DomainError, infra::pdf::PdfError};

/// Page geometry and timing used for every capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureLayout {
    /// Paper format name understood by the renderer.
    pub paper_format: &'static str,
    pub scale: f32,
    /// Uniform page margin in inches.
    pub margin_in: f32,
    /// Delay between page load and capture.
    pub settle: Duration,
}

pub const CAPTURE_LAYOUT: CaptureLayout = CaptureLayout {
    paper_format: "Letter",
    scale: 0.85,
    margin_in: 0.0,
    settle: Duration::from_millis(750),
};

/// What the renderer is asked to capture.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTarget {
    pub locator: Url,
    pub dark_mode: bool,
    pub layout: CaptureLayout,
}

/// Raw renderer output, before post-processing.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub pdf: Bytes,
    /// Title evaluated from the live document, if any.
    pub title: Option<String>,
}

/// Headless rendering capability.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, target: &RenderTarget) -> Result<RenderedDocument, RendererError>;
}

#[derive(Debug, Clone, Error)]
pub enum RendererError {
    #[error("renderer unavailable: {0}")]
    Unavailable(String),
    #[error("renderer exited unsuccessfully (exit {exit_code:?}): {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("renderer did not finish within {0:?}")]
    Timeout(Duration),
    #[error("renderer produced no PDF output")]
    EmptyOutput,
    #[error("renderer output is not a PDF")]
    InvalidOutput,
    #[error("invalid document locator: {0}")]
    Locator(String),
    #[error("renderer i/o failed: {0}")]
    Io(Arc<io::Error>),
}

impl RendererError {
    pub fn io(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Final output of a print request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderArtifact {
    pub bytes: Bytes,
    pub display_name: String,
}

#[derive(Debug, Clone, Error)]
pub enum PrintError {
    #[error(transparent)]
    InvalidIdentifier(#[from] DomainError),
    #[error("document render failed: {0}")]
    RenderFailure(RendererError),
    #[error("PDF post-processing failed: {0}")]
    PostProcessFailure(PdfError),
    #[error("render task aborted: {0}")]
    Aborted(String),
}

impl PrintError {
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted(message.into())
    }
}
