//! XML API: a streaming, namespace-aware XML 1.0 pull parser with
//! in-place editing.
//!
//! The centerpiece is [`XmlProcessor`], which walks a byte buffer one
//! token at a time, tracks the stack of open elements and the namespace
//! bindings in scope, enforces well-formedness, and stages byte-level
//! edits that are applied in a single pass while bookmarks and the
//! parse position shift along. Streaming input may stop mid-token; the
//! processor pauses and resumes when more bytes arrive, or later in a
//! different process via an opaque re-entrancy cursor.

mod cursor;
pub mod decoder;
mod macros;
mod str_fns;
pub mod utf8;
pub mod xml_processor;

pub use cursor::CursorError;
pub use xml_processor::errors::{SyntaxError, UnsupportedFeature, XmlProcessorError};
pub use xml_processor::{
    Crumb, ParserContext, TagQuery, TokenType, XmlAttributeToken, XmlElement, XmlProcessor,
    XML_NAMESPACE_URI, XMLNS_NAMESPACE_URI,
};
