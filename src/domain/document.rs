//! Document identifiers and print requests.
//!
//! A request names a remotely hosted document by its id and asks for one of
//! four output variants. Identifiers are plain ASCII alphanumerics; anything
//! missing, empty or reserved resolves to the configured fallback document.

use std::fmt;

use super::error::DomainError;

/// Document printed when a request names no document.
pub const DEFAULT_FALLBACK_DOCUMENT_ID: &str = "b7b46e3339f04662b52c7a700d22a338";

/// Display name used when the rendered document exposes no usable title.
pub const DEFAULT_DISPLAY_NAME: &str = "Document";

const RESERVED_IDS: [&str; 2] = ["help", "h"];

/// Validated document identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    /// Parse an identifier, rejecting anything but ASCII letters and digits.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        if raw.is_empty() || !raw.bytes().all(|byte| byte.is_ascii_alphanumeric()) {
            return Err(DomainError::invalid_identifier(raw));
        }
        Ok(Self(raw.to_string()))
    }

    /// Resolve a raw request value, substituting `fallback` for empty or
    /// reserved input before validating.
    pub fn resolve(raw: &str, fallback: &DocumentId) -> Result<Self, DomainError> {
        if is_substituted(raw) {
            return Ok(fallback.clone());
        }
        Self::parse(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_substituted(raw: &str) -> bool {
    raw.is_empty() || RESERVED_IDS.contains(&raw)
}

/// Output variant flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Variant {
    pub dark: bool,
    pub omit_final_page: bool,
}

impl Variant {
    pub const fn new(dark: bool, omit_final_page: bool) -> Self {
        Self {
            dark,
            omit_final_page,
        }
    }

    /// Suffixes appended to the document id, one per active flag, in a fixed order.
    pub fn key_suffix(self) -> String {
        let mut suffix = String::new();
        if self.dark {
            suffix.push_str("-dark");
        }
        if self.omit_final_page {
            suffix.push_str("-omit-final-page");
        }
        suffix
    }
}

/// An inbound print request as received, before normalization.
///
/// An empty `document_id` stands for a request that named no document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    document_id: String,
    variant: Variant,
}

impl RenderRequest {
    pub fn new(document_id: impl Into<String>, variant: Variant) -> Self {
        Self {
            document_id: document_id.into(),
            variant,
        }
    }

    /// Request for the fallback document.
    pub fn unnamed(variant: Variant) -> Self {
        Self::new(String::new(), variant)
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Resolve the raw id against `fallback` and validate it.
    pub fn normalize(&self, fallback: &DocumentId) -> Result<NormalizedRequest, DomainError> {
        let document_id = DocumentId::resolve(&self.document_id, fallback)?;
        Ok(NormalizedRequest {
            document_id,
            variant: self.variant,
        })
    }
}

/// A request whose document id has been resolved and validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedRequest {
    pub document_id: DocumentId,
    pub variant: Variant,
}

/// Turn a display name into a file stem that is safe inside a quoted
/// `Content-Disposition` filename and on common filesystems.
pub fn safe_file_stem(display_name: &str) -> String {
    let cleaned: String = display_name
        .chars()
        .map(|ch| match ch {
            '"' | '\\' | '/' | ':' | '*' | '?' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => ' ',
            ch => ch,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.').trim();
    if trimmed.is_empty() {
        DEFAULT_DISPLAY_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}
