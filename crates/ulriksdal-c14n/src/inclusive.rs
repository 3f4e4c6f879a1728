#![forbid(unsafe_code)]

//! Inclusive Canonical XML 1.0 (C14N 1.0).
//!
//! Algorithm URI: `http://www.w3.org/TR/2001/REC-xml-c14n-20010315`
//! With comments: `http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments`
//!
//! Every in-scope namespace is rendered on an output element unless the
//! nearest output ancestor already rendered the same binding.  In document
//! subsets, `xml:*` attributes of omitted ancestors are inherited.

use std::collections::BTreeMap;

use ulriksdal_core::ns;

use crate::render::{collect_inscope_namespaces, Attr, NsDecl, NsMap};

/// Namespace declarations to render on `node`, and the bindings its
/// children inherit.
pub(crate) fn namespace_axis(node: roxmltree::Node<'_, '_>, rendered: &NsMap) -> (Vec<NsDecl>, NsMap) {
    let in_scope = collect_inscope_namespaces(node);
    let mut decls = Vec::new();
    let mut child = rendered.clone();

    for (prefix, uri) in &in_scope {
        if rendered.get(prefix) != Some(uri) {
            decls.push(NsDecl::new(prefix, uri));
        }
        child.insert(prefix.clone(), uri.clone());
    }

    // The output parent had a default namespace this element does not.
    if !in_scope.contains_key("") && rendered.get("").is_some_and(|uri| !uri.is_empty()) {
        decls.push(NsDecl::new("", ""));
        child.insert(String::new(), String::new());
    }

    decls.sort();
    (decls, child)
}

/// `xml:*` attributes inherited from ancestors when the element's parent is
/// not part of the rendered subset.  The nearest ancestor value wins and the
/// element's own `xml:*` attributes take precedence.
pub(crate) fn inherited_xml_attrs(node: roxmltree::Node<'_, '_>, existing: &[Attr]) -> Vec<Attr> {
    let mut inherited: BTreeMap<String, String> = BTreeMap::new();
    for ancestor in node.ancestors().skip(1).filter(|n| n.is_element()) {
        for attr in ancestor.attributes() {
            if attr.namespace() == Some(ns::XML) {
                inherited
                    .entry(attr.name().to_owned())
                    .or_insert_with(|| attr.value().to_owned());
            }
        }
    }

    inherited
        .into_iter()
        .filter(|(name, _)| {
            !existing
                .iter()
                .any(|a| a.ns_uri == ns::XML && a.local_name == *name)
        })
        .map(|(name, value)| Attr {
            ns_uri: ns::XML.to_owned(),
            qualified_name: format!("xml:{name}"),
            local_name: name,
            value,
        })
        .collect()
}
