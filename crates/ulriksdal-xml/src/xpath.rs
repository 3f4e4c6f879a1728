#![forbid(unsafe_code)]

//! Minimal XPath/XPointer subset for same-document references.
//!
//! Only supports the patterns used by XML-DSig reference URIs:
//! - `""` : the whole document without comments
//! - `#xpointer(/)` : the whole document with comments
//! - `#id-value` : the identified element, without comments
//! - `#xpointer(id('id-value'))` : the identified element, with comments
//! - the ancestor-or-self axis (needed for the enveloped XPath pattern)

/// A parsed same-document URI reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameDocumentRef<'a> {
    Document { with_comments: bool },
    Id { id: &'a str, with_comments: bool },
}

impl<'a> SameDocumentRef<'a> {
    /// Parse a reference URI; `None` if it is not a same-document reference.
    pub fn parse(uri: &'a str) -> Option<Self> {
        if uri.is_empty() {
            return Some(SameDocumentRef::Document {
                with_comments: false,
            });
        }
        let fragment = parse_same_document_ref(uri)?;
        if fragment == "xpointer(/)" {
            return Some(SameDocumentRef::Document {
                with_comments: true,
            });
        }
        if let Some(id) = parse_xpointer_id(fragment) {
            return Some(SameDocumentRef::Id {
                id,
                with_comments: true,
            });
        }
        if fragment.starts_with("xpointer(") || fragment.is_empty() {
            return None;
        }
        Some(SameDocumentRef::Id {
            id: fragment,
            with_comments: false,
        })
    }

    pub fn with_comments(&self) -> bool {
        match self {
            SameDocumentRef::Document { with_comments }
            | SameDocumentRef::Id { with_comments, .. } => *with_comments,
        }
    }
}

/// Parse a same-document reference (e.g., `#foo` → `foo`).
pub fn parse_same_document_ref(uri: &str) -> Option<&str> {
    uri.strip_prefix('#')
}

/// Parse an `xpointer(id('...'))` expression and return the ID value.
pub fn parse_xpointer_id(expr: &str) -> Option<&str> {
    let inner = expr.strip_prefix("xpointer(id(")?;
    let inner = inner.strip_suffix("))")?;
    inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}

/// Check if `ancestor` is an ancestor-or-self of `node`.
pub fn is_ancestor_or_self(
    ancestor: roxmltree::Node<'_, '_>,
    node: roxmltree::Node<'_, '_>,
) -> bool {
    node.ancestors().any(|n| n.id() == ancestor.id())
}
