//! Re-entrancy cursor codec.
//!
//! A cursor captures just enough parser state to resume tokenizing at a
//! byte offset after everything before that offset has been discarded:
//! the absolute resume offset, the parsing context, the stack of open
//! elements with their namespace scopes, and the document-level
//! namespace seed. Consumers treat the encoded form as an opaque string;
//! they may store it or compare it for equality, nothing else.
//!
//! The payload is a versioned JSON document wrapped in URL-safe,
//! unpadded base64 so it survives query strings and log lines unescaped.
//! Namespace maps are ordered, so equal states encode to equal strings.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::xml_processor::ParserContext;

pub(crate) const CURSOR_VERSION: u32 = 1;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct ReentrancyCursor {
    pub version: u32,
    pub is_finished: bool,
    pub expecting_more_input: bool,
    pub upstream_bytes_forgotten: usize,
    pub parser_context: ParserContext,
    pub stack_of_open_elements: Vec<CursorElement>,
    pub document_namespaces: BTreeMap<String, String>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct CursorElement {
    pub namespace_prefix: Option<String>,
    pub local_name: String,
    pub namespace: String,
    pub namespaces_in_scope: BTreeMap<String, String>,
}

/// Why a cursor string could not be turned back into parser state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorError {
    /// The string is not valid base64 of the expected alphabet.
    InvalidEncoding,
    /// The payload does not deserialize into a cursor.
    InvalidPayload,
    /// The cursor was produced by an incompatible codec version.
    UnsupportedVersion,
}

impl std::fmt::Display for CursorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CursorError::InvalidEncoding => "cursor is not valid base64",
            CursorError::InvalidPayload => "cursor payload is malformed",
            CursorError::UnsupportedVersion => "cursor version is not supported",
        })
    }
}

impl std::error::Error for CursorError {}

impl ReentrancyCursor {
    pub fn encode(&self) -> String {
        let payload = serde_json::to_vec(self).expect("cursor structs always serialize");
        URL_SAFE_NO_PAD.encode(payload)
    }

    pub fn decode(encoded: &str) -> Result<Self, CursorError> {
        let payload = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| CursorError::InvalidEncoding)?;
        let cursor: ReentrancyCursor =
            serde_json::from_slice(&payload).map_err(|_| CursorError::InvalidPayload)?;

        if CURSOR_VERSION != cursor.version {
            return Err(CursorError::UnsupportedVersion);
        }

        Ok(cursor)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_cursor() -> ReentrancyCursor {
        let mut scope = BTreeMap::new();
        scope.insert("".to_string(), "urn:example".to_string());
        scope.insert(
            "wp".to_string(),
            "http://wordpress.org/export/1.2/".to_string(),
        );

        ReentrancyCursor {
            version: CURSOR_VERSION,
            is_finished: false,
            expecting_more_input: true,
            upstream_bytes_forgotten: 8_192,
            parser_context: ParserContext::InElement,
            stack_of_open_elements: vec![CursorElement {
                namespace_prefix: None,
                local_name: "rss".to_string(),
                namespace: "urn:example".to_string(),
                namespaces_in_scope: scope.clone(),
            }],
            document_namespaces: scope,
        }
    }

    #[test]
    fn round_trips() {
        let cursor = sample_cursor();
        let encoded = cursor.encode();
        assert_eq!(ReentrancyCursor::decode(&encoded).unwrap(), cursor);
    }

    #[test]
    fn equal_states_encode_identically() {
        assert_eq!(sample_cursor().encode(), sample_cursor().encode());
    }

    #[test]
    fn encoding_is_url_safe() {
        let encoded = sample_cursor().encode();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            ReentrancyCursor::decode("not&base64!"),
            Err(CursorError::InvalidEncoding)
        );
        assert_eq!(
            ReentrancyCursor::decode(&URL_SAFE_NO_PAD.encode(b"{}")),
            Err(CursorError::InvalidPayload)
        );
    }

    #[test]
    fn rejects_future_versions() {
        let mut cursor = sample_cursor();
        cursor.version = CURSOR_VERSION + 1;
        assert_eq!(
            ReentrancyCursor::decode(&cursor.encode()),
            Err(CursorError::UnsupportedVersion)
        );
    }
}
