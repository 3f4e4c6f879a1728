#![forbid(unsafe_code)]

//! Shared rendering engine for C14N output.
//!
//! Walks a parsed document in document order and writes the canonical form
//! of every node in the (optional) node set.  The inclusive and exclusive
//! variants differ only in how the namespace axis of an element is chosen
//! and whether `xml:*` attributes are inherited into document subsets.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use ulriksdal_core::{ns, Error};
use ulriksdal_xml::NodeSet;

use crate::{escape, exclusive, inclusive};

/// Namespace prefix → URI, "" for the default namespace.
pub(crate) type NsMap = BTreeMap<String, String>;

/// A namespace declaration to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsDecl {
    /// The prefix ("" for default namespace).
    pub prefix: String,
    /// The namespace URI.
    pub uri: String,
}

impl NsDecl {
    pub fn new(prefix: &str, uri: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            uri: uri.to_owned(),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        if self.prefix.is_empty() {
            out.extend_from_slice(b" xmlns=\"");
        } else {
            out.extend_from_slice(b" xmlns:");
            out.extend_from_slice(self.prefix.as_bytes());
            out.extend_from_slice(b"=\"");
        }
        escape::push_attr(out, &self.uri);
        out.push(b'"');
    }
}

impl Ord for NsDecl {
    fn cmp(&self, other: &Self) -> Ordering {
        // Default namespace (empty prefix) sorts first, then by prefix.
        match (self.prefix.is_empty(), other.prefix.is_empty()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => self.prefix.cmp(&other.prefix),
        }
    }
}

impl PartialOrd for NsDecl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An attribute to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    /// The namespace URI of the attribute ("" for no namespace).
    pub ns_uri: String,
    pub local_name: String,
    /// `prefix:local` or just `local`.
    pub qualified_name: String,
    pub value: String,
}

impl Attr {
    fn write(&self, out: &mut Vec<u8>) {
        out.push(b' ');
        out.extend_from_slice(self.qualified_name.as_bytes());
        out.extend_from_slice(b"=\"");
        escape::push_attr(out, &self.value);
        out.push(b'"');
    }
}

impl Ord for Attr {
    fn cmp(&self, other: &Self) -> Ordering {
        // Un-namespaced attributes first, then by (namespace URI, local name).
        match (self.ns_uri.is_empty(), other.ns_uri.is_empty()) {
            (true, true) => self.local_name.cmp(&other.local_name),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self
                .ns_uri
                .cmp(&other.ns_uri)
                .then_with(|| self.local_name.cmp(&other.local_name)),
        }
    }
}

impl PartialOrd for Attr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// How the namespace axis of a rendered element is computed.
#[derive(Debug, Clone, Copy)]
pub(crate) enum NamespaceAxis<'a> {
    Inclusive,
    Exclusive { inclusive_prefixes: &'a [String] },
}

pub(crate) struct Renderer<'a> {
    pub with_comments: bool,
    pub node_set: Option<&'a NodeSet>,
    pub axis: NamespaceAxis<'a>,
}

impl<'a> Renderer<'a> {
    pub fn render(&self, doc: &roxmltree::Document<'_>) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        self.process_node(doc.root(), &mut out, &NsMap::new())?;
        Ok(out)
    }

    fn is_visible(&self, node: &roxmltree::Node<'_, '_>) -> bool {
        self.node_set.map_or(true, |ns| ns.contains(node))
    }

    fn process_node(
        &self,
        node: roxmltree::Node<'_, '_>,
        out: &mut Vec<u8>,
        rendered: &NsMap,
    ) -> Result<(), Error> {
        match node.node_type() {
            roxmltree::NodeType::Root => {
                for child in node.children() {
                    self.process_node(child, out, rendered)?;
                }
            }
            roxmltree::NodeType::Element => self.process_element(node, out, rendered)?,
            roxmltree::NodeType::Text => {
                if self.is_visible(&node) {
                    escape::push_text(out, node.text().unwrap_or(""));
                }
            }
            roxmltree::NodeType::Comment => {
                if self.with_comments && self.is_visible(&node) {
                    top_level_separator_before(node, out);
                    out.extend_from_slice(b"<!--");
                    out.extend_from_slice(node.text().unwrap_or("").as_bytes());
                    out.extend_from_slice(b"-->");
                    top_level_separator_after(node, out);
                }
            }
            roxmltree::NodeType::PI => {
                if self.is_visible(&node) {
                    let pi = node
                        .pi()
                        .ok_or_else(|| Error::Canonicalization("PI node without data".into()))?;
                    top_level_separator_before(node, out);
                    out.extend_from_slice(b"<?");
                    out.extend_from_slice(pi.target.as_bytes());
                    if let Some(value) = pi.value.filter(|v| !v.is_empty()) {
                        out.push(b' ');
                        escape::push_pi(out, value);
                    }
                    out.extend_from_slice(b"?>");
                    top_level_separator_after(node, out);
                }
            }
        }
        Ok(())
    }

    fn process_element(
        &self,
        node: roxmltree::Node<'_, '_>,
        out: &mut Vec<u8>,
        rendered: &NsMap,
    ) -> Result<(), Error> {
        if !self.is_visible(&node) {
            // Children of an omitted element see the namespaces rendered by
            // the nearest output ancestor.
            for child in node.children() {
                self.process_node(child, out, rendered)?;
            }
            return Ok(());
        }

        let (ns_decls, child_rendered) = match self.axis {
            NamespaceAxis::Inclusive => inclusive::namespace_axis(node, rendered),
            NamespaceAxis::Exclusive { inclusive_prefixes } => {
                exclusive::namespace_axis(node, rendered, inclusive_prefixes)
            }
        };

        let mut attrs = element_attributes(node);
        if matches!(self.axis, NamespaceAxis::Inclusive) && self.node_set.is_some() {
            let parent_omitted = node
                .parent()
                .map_or(true, |p| !p.is_element() || !self.is_visible(&p));
            if parent_omitted {
                let inherited = inclusive::inherited_xml_attrs(node, &attrs);
                attrs.extend(inherited);
            }
        }
        attrs.sort();

        let name = qualified_element_name(node);
        out.push(b'<');
        out.extend_from_slice(name.as_bytes());
        for decl in &ns_decls {
            decl.write(out);
        }
        for attr in &attrs {
            attr.write(out);
        }
        out.push(b'>');

        for child in node.children() {
            self.process_node(child, out, &child_rendered)?;
        }

        out.extend_from_slice(b"</");
        out.extend_from_slice(name.as_bytes());
        out.push(b'>');
        Ok(())
    }
}

/// Document-level comments and PIs are separated from the document
/// element by a line feed.
fn top_level_separator_before(node: roxmltree::Node<'_, '_>, out: &mut Vec<u8>) {
    if parent_is_root(node) && node.prev_siblings().any(|s| s.is_element()) {
        out.push(b'\n');
    }
}

fn top_level_separator_after(node: roxmltree::Node<'_, '_>, out: &mut Vec<u8>) {
    if parent_is_root(node) && node.next_siblings().any(|s| s.is_element()) {
        out.push(b'\n');
    }
}

fn parent_is_root(node: roxmltree::Node<'_, '_>) -> bool {
    node.parent()
        .is_some_and(|p| p.node_type() == roxmltree::NodeType::Root)
}

/// Collect all in-scope namespaces for an element, closer declarations
/// overriding more distant ones.  The `xml` prefix is never included.
pub(crate) fn collect_inscope_namespaces(node: roxmltree::Node<'_, '_>) -> NsMap {
    let mut levels: Vec<NsMap> = Vec::new();
    for n in node.ancestors().filter(|n| n.is_element()) {
        let level = n
            .namespaces()
            .map(|ns| (ns.name().unwrap_or("").to_owned(), ns.uri().to_owned()))
            .collect();
        levels.push(level);
    }
    let mut result = NsMap::new();
    for level in levels.into_iter().rev() {
        for (prefix, uri) in level {
            if prefix == "xml" {
                continue;
            }
            if uri.is_empty() {
                result.remove(&prefix);
            } else {
                result.insert(prefix, uri);
            }
        }
    }
    result
}

/// The element's prefix as written in the source, "" when unprefixed.
pub(crate) fn element_prefix(node: roxmltree::Node<'_, '_>) -> String {
    let text = node.document().input_text();
    let range = node.range();
    if let Some(tag) = text.get(range.start + 1..range.end) {
        let end = tag
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(tag.len());
        let qname = &tag[..end];
        let (prefix, local) = qname.split_once(':').unwrap_or(("", qname));
        if local == node.tag_name().name() {
            return prefix.to_owned();
        }
    }
    // Fall back to the namespace binding when the source is unavailable.
    match node.tag_name().namespace() {
        Some(uri) => node.lookup_prefix(uri).unwrap_or("").to_owned(),
        None => String::new(),
    }
}

/// The prefix bound to an attribute's namespace URI.
pub(crate) fn attribute_prefix(node: roxmltree::Node<'_, '_>, ns_uri: &str) -> Option<String> {
    if ns_uri == ns::XML {
        return Some("xml".to_owned());
    }
    node.namespaces()
        .find(|n| n.uri() == ns_uri && n.name().is_some())
        .and_then(|n| n.name())
        .map(str::to_owned)
}

pub(crate) fn qualified_element_name(node: roxmltree::Node<'_, '_>) -> String {
    let prefix = element_prefix(node);
    if prefix.is_empty() {
        node.tag_name().name().to_owned()
    } else {
        format!("{prefix}:{}", node.tag_name().name())
    }
}

fn element_attributes(node: roxmltree::Node<'_, '_>) -> Vec<Attr> {
    node.attributes()
        .map(|attr| {
            let ns_uri = attr.namespace().unwrap_or("");
            let qualified_name = match attr
                .namespace()
                .and_then(|uri| attribute_prefix(node, uri))
            {
                Some(prefix) => format!("{prefix}:{}", attr.name()),
                None => attr.name().to_owned(),
            };
            Attr {
                ns_uri: ns_uri.to_owned(),
                local_name: attr.name().to_owned(),
                qualified_name,
                value: attr.value().to_owned(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_prefix_from_source() {
        let doc = roxmltree::Document::parse(
            r#"<ds:a xmlns:ds="urn:d" xmlns="urn:d"><b/><ds:c /></ds:a>"#,
        )
        .unwrap();
        let names: Vec<String> = doc
            .descendants()
            .filter(|n| n.is_element())
            .map(qualified_element_name)
            .collect();
        assert_eq!(names, vec!["ds:a", "b", "ds:c"]);
    }

    #[test]
    fn test_inscope_namespaces() {
        let doc = roxmltree::Document::parse(
            r#"<a xmlns="urn:a" xmlns:p="urn:p"><b xmlns:p="urn:q"/></a>"#,
        )
        .unwrap();
        let b = doc.descendants().find(|n| n.has_tag_name("b")).unwrap();
        let m = collect_inscope_namespaces(b);
        assert_eq!(m.get("").map(String::as_str), Some("urn:a"));
        assert_eq!(m.get("p").map(String::as_str), Some("urn:q"));
        assert!(!m.contains_key("xml"));
    }

    #[test]
    fn test_attr_ordering() {
        let plain = Attr {
            ns_uri: String::new(),
            local_name: "z".into(),
            qualified_name: "z".into(),
            value: String::new(),
        };
        let namespaced = Attr {
            ns_uri: "urn:a".into(),
            local_name: "a".into(),
            qualified_name: "p:a".into(),
            value: String::new(),
        };
        assert!(plain < namespaced);
        assert!(NsDecl::new("", "urn:x") < NsDecl::new("a", "urn:y"));
    }
}
