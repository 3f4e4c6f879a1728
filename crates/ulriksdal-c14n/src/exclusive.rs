#![forbid(unsafe_code)]

//! Exclusive Canonical XML 1.0 (exc-C14N).
//!
//! Algorithm URI: `http://www.w3.org/2001/10/xml-exc-c14n#`
//! With comments: `http://www.w3.org/2001/10/xml-exc-c14n#WithComments`
//!
//! Only "visibly utilized" namespace declarations are output: the prefix of
//! the element itself, the prefixes of its attributes, and the prefixes in
//! the InclusiveNamespaces PrefixList (`#default` names the default
//! namespace).

use std::collections::BTreeSet;

use ulriksdal_core::ns;

use crate::render::{attribute_prefix, collect_inscope_namespaces, element_prefix, NsDecl, NsMap};

pub(crate) fn namespace_axis(
    node: roxmltree::Node<'_, '_>,
    rendered: &NsMap,
    inclusive_prefixes: &[String],
) -> (Vec<NsDecl>, NsMap) {
    let in_scope = collect_inscope_namespaces(node);

    let mut utilized: BTreeSet<String> = BTreeSet::new();
    utilized.insert(element_prefix(node));
    for attr in node.attributes() {
        if let Some(uri) = attr.namespace().filter(|uri| *uri != ns::XML) {
            if let Some(prefix) = attribute_prefix(node, uri) {
                utilized.insert(prefix);
            }
        }
    }
    for prefix in inclusive_prefixes {
        let key = if prefix == "#default" { "" } else { prefix.as_str() };
        if in_scope.contains_key(key) {
            utilized.insert(key.to_owned());
        }
    }

    let mut decls = Vec::new();
    let mut child = rendered.clone();
    for prefix in utilized {
        match in_scope.get(&prefix) {
            Some(uri) => {
                if rendered.get(&prefix) != Some(uri) {
                    decls.push(NsDecl::new(&prefix, uri));
                    child.insert(prefix, uri.clone());
                }
            }
            None if prefix.is_empty() => {
                if rendered.get("").is_some_and(|uri| !uri.is_empty()) {
                    decls.push(NsDecl::new("", ""));
                    child.insert(String::new(), String::new());
                }
            }
            None => {}
        }
    }

    decls.sort();
    (decls, child)
}
