#![forbid(unsafe_code)]

//! XML Canonicalization (C14N) for the Ulriksdal XML-DSig engine.
//!
//! Canonicalizers are the collaborator that turns a node set into a unique
//! byte serialization.  Implemented variants:
//! - Canonical XML 1.0 (with and without comments)
//! - Exclusive Canonical XML 1.0 (with and without comments)
//!
//! Canonical XML 1.1 URIs are accepted and rendered with the 1.0 rules; the
//! two only differ for `xml:id` and `xml:base` in document subsets.

pub mod escape;
mod exclusive;
mod inclusive;
pub mod render;

use ulriksdal_core::{algorithm, Error};
use ulriksdal_xml::NodeSet;

use render::{NamespaceAxis, Renderer};

/// The canonicalization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum C14nMode {
    /// Canonical XML 1.0
    #[default]
    Inclusive,
    /// Canonical XML 1.0 with comments
    InclusiveWithComments,
    /// Canonical XML 1.1
    Inclusive11,
    /// Canonical XML 1.1 with comments
    Inclusive11WithComments,
    /// Exclusive Canonical XML 1.0
    Exclusive,
    /// Exclusive Canonical XML 1.0 with comments
    ExclusiveWithComments,
}

impl C14nMode {
    /// Every supported mode.
    pub const ALL: [C14nMode; 6] = [
        C14nMode::Inclusive,
        C14nMode::InclusiveWithComments,
        C14nMode::Inclusive11,
        C14nMode::Inclusive11WithComments,
        C14nMode::Exclusive,
        C14nMode::ExclusiveWithComments,
    ];

    /// Get the algorithm URI for this mode.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Inclusive => algorithm::C14N,
            Self::InclusiveWithComments => algorithm::C14N_WITH_COMMENTS,
            Self::Inclusive11 => algorithm::C14N11,
            Self::Inclusive11WithComments => algorithm::C14N11_WITH_COMMENTS,
            Self::Exclusive => algorithm::EXC_C14N,
            Self::ExclusiveWithComments => algorithm::EXC_C14N_WITH_COMMENTS,
        }
    }

    /// Parse a C14N mode from an algorithm URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.uri() == uri)
    }

    pub fn with_comments(&self) -> bool {
        matches!(
            self,
            Self::InclusiveWithComments | Self::Inclusive11WithComments | Self::ExclusiveWithComments
        )
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive | Self::ExclusiveWithComments)
    }
}

/// Canonicalize an XML document given as text.
///
/// - `node_set`: optional node set (for document-subset canonicalization)
/// - `inclusive_prefixes`: for exclusive C14N, the InclusiveNamespaces PrefixList
pub fn canonicalize(
    xml: &str,
    mode: C14nMode,
    node_set: Option<&NodeSet>,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    let doc = roxmltree::Document::parse_with_options(xml, ulriksdal_xml::parsing_options())
        .map_err(|e| Error::XmlParse(e.to_string()))?;
    canonicalize_doc(&doc, mode, node_set, inclusive_prefixes)
}

/// Canonicalize a pre-parsed document.
pub fn canonicalize_doc(
    doc: &roxmltree::Document<'_>,
    mode: C14nMode,
    node_set: Option<&NodeSet>,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    let axis = if mode.is_exclusive() {
        NamespaceAxis::Exclusive { inclusive_prefixes }
    } else {
        NamespaceAxis::Inclusive
    };
    Renderer {
        with_comments: mode.with_comments(),
        node_set,
        axis,
    }
    .render(doc)
}
