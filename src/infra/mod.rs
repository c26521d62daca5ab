//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod http;
pub mod pdf;
pub mod renderer;
pub mod telemetry;
