#![forbid(unsafe_code)]

//! NodeSet type for XML canonicalization and transforms.
//!
//! A `NodeSet` represents a set of nodes from an XML document, identified by
//! their roxmltree node index.  Transforms narrow it; document-subset
//! canonicalization renders only its members.

use std::collections::HashSet;
use std::sync::Arc;

use crate::XmlDocument;

/// Index of a node inside its parsed document.
pub fn node_index(node: roxmltree::Node<'_, '_>) -> usize {
    node.id().get_usize()
}

/// A set of XML document nodes identified by index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet {
    nodes: HashSet<usize>,
}

impl NodeSet {
    /// Create an empty node set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node set containing all nodes in the document.
    pub fn all(doc: &roxmltree::Document<'_>) -> Self {
        Self::tree_with_comments(doc.root())
    }

    /// Create a node set containing all nodes except comments.
    /// Per the XML-DSig rules, `URI=""` selects the document without comments.
    pub fn all_without_comments(doc: &roxmltree::Document<'_>) -> Self {
        Self::tree_without_comments(doc.root())
    }

    /// Create a node set for a subtree rooted at the given node (without comments).
    pub fn tree_without_comments(root: roxmltree::Node<'_, '_>) -> Self {
        let mut nodes = HashSet::new();
        collect_subtree(root, &mut nodes, false);
        Self { nodes }
    }

    /// Create a node set for a subtree rooted at the given node (with comments).
    pub fn tree_with_comments(root: roxmltree::Node<'_, '_>) -> Self {
        let mut nodes = HashSet::new();
        collect_subtree(root, &mut nodes, true);
        Self { nodes }
    }

    /// Check if a node is in this set.
    pub fn contains(&self, node: &roxmltree::Node<'_, '_>) -> bool {
        self.nodes.contains(&node_index(*node))
    }

    /// Add a node to this set.
    pub fn insert(&mut self, node: roxmltree::Node<'_, '_>) {
        self.nodes.insert(node_index(node));
    }

    /// Remove a node and all its descendants from this set.
    pub fn remove_subtree(&mut self, root: roxmltree::Node<'_, '_>) {
        for n in root.descendants() {
            self.nodes.remove(&node_index(n));
        }
    }

    /// Members of this set in document order.
    pub fn in_document_order<'a, 'input>(
        &self,
        doc: &'a roxmltree::Document<'input>,
    ) -> Vec<roxmltree::Node<'a, 'input>> {
        doc.descendants().filter(|n| self.contains(n)).collect()
    }

    /// Check if this set is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes in the set.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// A node set together with the document it indexes into.
#[derive(Debug, Clone)]
pub struct XmlNodes {
    pub doc: Arc<XmlDocument>,
    pub nodes: NodeSet,
}

impl XmlNodes {
    pub fn new(doc: Arc<XmlDocument>, nodes: NodeSet) -> Self {
        Self { doc, nodes }
    }
}

fn collect_subtree(node: roxmltree::Node<'_, '_>, set: &mut HashSet<usize>, include_comments: bool) {
    if !include_comments && node.is_comment() {
        return;
    }
    set.insert(node_index(node));
    for child in node.children() {
        collect_subtree(child, set, include_comments);
    }
}
