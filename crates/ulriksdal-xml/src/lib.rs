#![forbid(unsafe_code)]

//! XML document abstraction for the Ulriksdal XML-DSig engine.
//!
//! Provides an owned document over `roxmltree`, `NodeSet` operations and
//! node filters needed by transforms and canonicalization, plus a small
//! writer used to serialize `Reference` and `Transforms` elements.

pub mod document;
pub mod filter;
pub mod nodeset;
pub mod writer;
pub mod xpath;

pub use document::XmlDocument;
pub use filter::{FilterDecision, NodeFilter, SubtreeExclusionFilter};
pub use nodeset::{NodeSet, XmlNodes};

/// Return roxmltree parsing options that allow DTD.
///
/// roxmltree never fetches external entities.
pub fn parsing_options() -> roxmltree::ParsingOptions {
    roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    }
}
