#![forbid(unsafe_code)]

//! Node filters applied when a transform input is materialized as a node set.
//!
//! The enveloped-signature transform registers a filter that removes the
//! enclosing `<Signature>` element instead of rewriting the node set eagerly,
//! so the exclusion survives later byte-to-node conversions.

use std::fmt;

use crate::nodeset::{node_index, NodeSet};

/// What a filter decides for a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Keep the node (if it is in the set).
    Include,
    /// Drop the node but keep examining its descendants.
    Skip,
    /// Drop the node and all its descendants.
    SkipSubtree,
}

/// An inclusion/exclusion predicate over document nodes.
pub trait NodeFilter: fmt::Debug + Send + Sync {
    fn decide(&self, node: roxmltree::Node<'_, '_>) -> FilterDecision;
}

/// Excludes the subtree rooted at a fixed node index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubtreeExclusionFilter {
    root: usize,
}

impl SubtreeExclusionFilter {
    pub fn new(root: usize) -> Self {
        Self { root }
    }

    pub fn root(&self) -> usize {
        self.root
    }
}

impl NodeFilter for SubtreeExclusionFilter {
    fn decide(&self, node: roxmltree::Node<'_, '_>) -> FilterDecision {
        if node_index(node) == self.root {
            FilterDecision::SkipSubtree
        } else {
            FilterDecision::Include
        }
    }
}

/// Apply `filters` to `set`, walking `doc` in document order.
pub fn apply_filters<F>(doc: &roxmltree::Document<'_>, set: &NodeSet, filters: &[F]) -> NodeSet
where
    F: AsRef<dyn NodeFilter>,
{
    if filters.is_empty() {
        return set.clone();
    }
    let mut out = NodeSet::new();
    walk(doc.root(), set, filters, &mut out);
    out
}

fn walk<F>(node: roxmltree::Node<'_, '_>, set: &NodeSet, filters: &[F], out: &mut NodeSet)
where
    F: AsRef<dyn NodeFilter>,
{
    let mut keep = set.contains(&node);
    for f in filters {
        match f.as_ref().decide(node) {
            FilterDecision::SkipSubtree => return,
            FilterDecision::Skip => keep = false,
            FilterDecision::Include => {}
        }
    }
    if keep {
        out.insert(node);
    }
    for child in node.children() {
        walk(child, set, filters, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug)]
    struct DropText;

    impl NodeFilter for DropText {
        fn decide(&self, node: roxmltree::Node<'_, '_>) -> FilterDecision {
            if node.is_text() {
                FilterDecision::Skip
            } else {
                FilterDecision::Include
            }
        }
    }

    #[test]
    fn test_subtree_exclusion() {
        let doc = roxmltree::Document::parse("<r><s><x/></s><y/></r>").unwrap();
        let s = doc.descendants().find(|n| n.has_tag_name("s")).unwrap();
        let filters: Vec<Arc<dyn NodeFilter>> =
            vec![Arc::new(SubtreeExclusionFilter::new(node_index(s)))];
        let out = apply_filters(&doc, &NodeSet::all(&doc), &filters);
        assert!(!out.contains(&s));
        assert!(!doc
            .descendants()
            .filter(|n| n.has_tag_name("x"))
            .any(|n| out.contains(&n)));
        assert!(doc
            .descendants()
            .filter(|n| n.has_tag_name("y"))
            .all(|n| out.contains(&n)));
    }

    #[test]
    fn test_skip_keeps_descendants() {
        let doc = roxmltree::Document::parse("<r>t<a>u</a></r>").unwrap();
        let filters: Vec<Arc<dyn NodeFilter>> = vec![Arc::new(DropText)];
        let out = apply_filters(&doc, &NodeSet::all(&doc), &filters);
        assert!(out.in_document_order(&doc).iter().all(|n| !n.is_text()));
        assert_eq!(out.len(), 3);
    }
}
