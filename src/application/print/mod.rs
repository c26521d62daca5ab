//! Render-and-cache pipeline for document prints.
//!
//! [`PrintPipeline::serve`] validates a request, answers from the cache when
//! a fresh entry exists, and otherwise renders through [`RenderEngine`] with
//! at most one render per cache key in flight.

mod engine;
mod pipeline;
pub mod postprocess;
mod single_flight;
mod types;

pub use engine::{RenderEngine, display_name_from, display_name_of};
pub use pipeline::PrintPipeline;
pub use single_flight::{FlightAborted, FlightRole, SingleFlight};
pub use types::{
    CAPTURE_LAYOUT, CaptureLayout, DocumentRenderer, PrintError, RenderArtifact, RenderTarget,
    RenderedDocument, RendererError,
};
