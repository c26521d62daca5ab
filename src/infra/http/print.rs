use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Path, RawQuery, State, rejection::PathRejection},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    application::{
        error::HttpError,
        print::{PrintPipeline, RenderArtifact},
    },
    domain::{
        document::{RenderRequest, Variant, safe_file_stem},
        error::INVALID_IDENTIFIER_MESSAGE,
    },
};

use super::middleware::{allow_cross_origin, log_responses, set_request_context};

const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Clone)]
pub struct PrintState {
    pub pipeline: Arc<PrintPipeline>,
}

impl PrintState {
    pub fn new(pipeline: Arc<PrintPipeline>) -> Self {
        Self { pipeline }
    }
}

pub fn build_router(state: PrintState) -> Router {
    Router::new()
        .route("/print", get(print_unnamed))
        .route("/print/", get(print_unnamed))
        .route("/print/{document_id}", get(print_document))
        .route("/api/print", get(print_unnamed))
        .route("/api/print/", get(print_unnamed))
        .route("/api/print/{document_id}", get(print_document))
        .route("/_health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(allow_cross_origin))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn print_document(
    State(state): State<PrintState>,
    document_id: Result<Path<String>, PathRejection>,
    RawQuery(query): RawQuery,
) -> Result<Response, HttpError> {
    let Path(document_id) = document_id.map_err(|rejection| {
        HttpError::new(
            "infra::http::print_document",
            StatusCode::BAD_REQUEST,
            INVALID_IDENTIFIER_MESSAGE,
            rejection.body_text(),
        )
    })?;
    let query = PrintQuery::parse(query.as_deref());
    let request = RenderRequest::new(document_id, query.variant);
    respond(&state, &request).await
}

/// `/print` without a path segment; the id may come from `?pageId=`.
async fn print_unnamed(
    State(state): State<PrintState>,
    RawQuery(query): RawQuery,
) -> Result<Response, HttpError> {
    let query = PrintQuery::parse(query.as_deref());
    let request = match query.page_id {
        Some(page_id) => RenderRequest::new(page_id, query.variant),
        None => RenderRequest::unnamed(query.variant),
    };
    respond(&state, &request).await
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn respond(state: &PrintState, request: &RenderRequest) -> Result<Response, HttpError> {
    let artifact = state.pipeline.serve(request).await?;
    Ok(pdf_response(artifact))
}

fn pdf_response(artifact: RenderArtifact) -> Response {
    let disposition = content_disposition(&artifact.display_name);
    let mut response = Body::from(artifact.bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(PDF_CONTENT_TYPE),
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PrintQuery {
    variant: Variant,
    page_id: Option<String>,
}

impl PrintQuery {
    /// Read the presence-based `dark` and `omitFinalPage` flags and an
    /// optional `pageId`.
    ///
    /// A bare key or any value turns a flag on, except `false`, `0`, `no` and
    /// `off`. The last occurrence wins.
    fn parse(query: Option<&str>) -> Self {
        let mut parsed = Self::default();
        let Some(query) = query else {
            return parsed;
        };
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "dark" => parsed.variant.dark = flag_enabled(&value),
                "omitFinalPage" => parsed.variant.omit_final_page = flag_enabled(&value),
                "pageId" => parsed.page_id = Some(value.into_owned()),
                _ => {}
            }
        }
        parsed
    }
}

fn flag_enabled(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "false" | "0" | "no" | "off"
    )
}

fn content_disposition(display_name: &str) -> String {
    let stem = safe_file_stem(display_name);
    if stem.is_ascii() {
        return format!("inline; filename=\"{stem}.pdf\"");
    }
    let fallback: String = stem
        .chars()
        .map(|ch| if ch.is_ascii() { ch } else { '_' })
        .collect();
    format!(
        "inline; filename=\"{fallback}.pdf\"; filename*=UTF-8''{}",
        encode_ext_value(&format!("{stem}.pdf"))
    )
}

/// Percent-encode `value` as an RFC 8187 `ext-value`.
fn encode_ext_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        let keep = byte.is_ascii_alphanumeric()
            || matches!(
                byte,
                b'!' | b'#' | b'$' | b'&' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
            );
        if keep {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}
