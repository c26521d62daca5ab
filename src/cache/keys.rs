//! Cache key derivation.
//!
//! One key per `(document, variant)` pair. Variant suffixes contain `-`, which
//! never appears in a valid document id, so keys of different variants cannot
//! collide.

use std::fmt;

use crate::domain::document::{DocumentId, NormalizedRequest, Variant};

const FILE_EXTENSION: &str = "pdf";

/// Identifies one cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(document_id: &DocumentId, variant: Variant) -> Self {
        Self(format!("{document_id}{}", variant.key_suffix()))
    }

    pub fn for_request(request: &NormalizedRequest) -> Self {
        Self::derive(&request.document_id, request.variant)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the file holding this entry inside the cache directory.
    pub fn file_name(&self) -> String {
        format!("{}.{FILE_EXTENSION}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn id(raw: &str) -> DocumentId {
        DocumentId::parse(raw).expect("valid id")
    }

    #[test]
    fn plain_variant_uses_bare_id() {
        let key = CacheKey::derive(&id("abc123"), Variant::default());
        assert_eq!(key.as_str(), "abc123");
        assert_eq!(key.file_name(), "abc123.pdf");
    }

    #[test]
    fn derivation_is_deterministic() {
        let variant = Variant::new(true, true);
        assert_eq!(
            CacheKey::derive(&id("abc123"), variant),
            CacheKey::derive(&id("abc123"), variant)
        );
    }

    #[test]
    fn every_variant_gets_its_own_key() {
        let keys: HashSet<CacheKey> = [
            Variant::new(false, false),
            Variant::new(true, false),
            Variant::new(false, true),
            Variant::new(true, true),
        ]
        .into_iter()
        .map(|variant| CacheKey::derive(&id("abc123"), variant))
        .collect();
        assert_eq!(keys.len(), 4);
        assert!(keys.contains(&CacheKey("abc123-dark-omit-final-page".to_string())));
    }
}
