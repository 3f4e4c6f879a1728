#![forbid(unsafe_code)]

//! Transform input that is either a byte stream or a set of document nodes.
//!
//! Conversions are lazy and one-directional in effect:
//! - bytes → nodes parses the bytes and drops them (re-parsing malformed
//!   input is not guaranteed to give the same tree twice);
//! - nodes → bytes canonicalizes and keeps the node form, caching the
//!   canonical bytes so every later call returns the same buffer.

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use ulriksdal_c14n::C14nMode;
use ulriksdal_core::Error;
use ulriksdal_xml::filter::apply_filters;
use ulriksdal_xml::nodeset::node_index;
use ulriksdal_xml::{NodeFilter, NodeSet, XmlDocument, XmlNodes};

/// Name of the synthetic element wrapped around malformed content.
const RECOVERY_WRAPPER: &str = "container";

/// The authoritative representation of a [`DualFormInput`].
pub enum InputForm {
    /// Raw bytes not yet read.
    Stream(Box<dyn Read + Send>),
    /// Buffered bytes.
    Bytes(Vec<u8>),
    /// A subtree of a document.
    Subtree {
        doc: Arc<XmlDocument>,
        root: usize,
        /// A descendant whose subtree is left out.
        exclude: Option<usize>,
        with_comments: bool,
    },
    /// An explicit node set.
    NodeSet(XmlNodes),
}

impl fmt::Debug for InputForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputForm::Stream(_) => f.write_str("Stream"),
            InputForm::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            InputForm::Subtree {
                root,
                exclude,
                with_comments,
                ..
            } => f
                .debug_struct("Subtree")
                .field("root", root)
                .field("exclude", exclude)
                .field("with_comments", with_comments)
                .finish(),
            InputForm::NodeSet(nodes) => write!(f, "NodeSet({} nodes)", nodes.nodes.len()),
        }
    }
}

/// Data flowing into and through a transform pipeline.
pub struct DualFormInput {
    form: InputForm,
    /// Canonical bytes of the node form, computed on first `as_bytes`.
    canonical: Option<Vec<u8>>,
    filters: Vec<Arc<dyn NodeFilter>>,
    /// Filters were added after the node set was last materialized.
    filters_pending: bool,
    c14n_mode: C14nMode,
    source_uri: Option<String>,
    mime_type: Option<String>,
    legacy_recovery: bool,
    /// Extra ID attribute names registered on documents parsed from bytes.
    id_attrs: Vec<String>,
}

impl fmt::Debug for DualFormInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualFormInput")
            .field("form", &self.form)
            .field("filters", &self.filters.len())
            .field("c14n_mode", &self.c14n_mode)
            .field("source_uri", &self.source_uri)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

impl DualFormInput {
    fn with_form(form: InputForm) -> Self {
        Self {
            form,
            canonical: None,
            filters: Vec::new(),
            filters_pending: false,
            c14n_mode: C14nMode::Inclusive,
            source_uri: None,
            mime_type: None,
            legacy_recovery: true,
            id_attrs: Vec::new(),
        }
    }

    /// An input holding no data in either representation.
    pub fn empty() -> Self {
        Self::with_form(InputForm::Bytes(Vec::new()))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::with_form(InputForm::Bytes(bytes))
    }

    pub fn from_stream<R: Read + Send + 'static>(reader: R) -> Self {
        Self::with_form(InputForm::Stream(Box::new(reader)))
    }

    /// The subtree rooted at `root` (a node index of `doc`).
    pub fn from_subtree(doc: Arc<XmlDocument>, root: usize, with_comments: bool) -> Self {
        Self::with_form(InputForm::Subtree {
            doc,
            root,
            exclude: None,
            with_comments,
        })
    }

    /// The subtree rooted at `root` without the subtree rooted at `exclude`.
    pub fn from_subtree_excluding(
        doc: Arc<XmlDocument>,
        root: usize,
        exclude: usize,
        with_comments: bool,
    ) -> Self {
        Self::with_form(InputForm::Subtree {
            doc,
            root,
            exclude: Some(exclude),
            with_comments,
        })
    }

    pub fn from_node_set(nodes: XmlNodes) -> Self {
        Self::with_form(InputForm::NodeSet(nodes))
    }

    pub fn with_source_uri(mut self, uri: impl Into<String>) -> Self {
        self.source_uri = Some(uri.into());
        self
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn source_uri(&self) -> Option<&str> {
        self.source_uri.as_deref()
    }

    pub fn set_source_uri(&mut self, uri: Option<String>) {
        self.source_uri = uri;
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn form(&self) -> &InputForm {
        &self.form
    }

    /// The canonicalization used when node form is converted to bytes.
    pub fn c14n_mode(&self) -> C14nMode {
        self.c14n_mode
    }

    pub fn set_c14n_mode(&mut self, mode: C14nMode) {
        if mode != self.c14n_mode {
            self.canonical = None;
        }
        self.c14n_mode = mode;
    }

    /// Enable or disable the wrapped-reparse recovery for malformed bytes.
    pub fn set_legacy_recovery(&mut self, enabled: bool) {
        self.legacy_recovery = enabled;
    }

    /// ID attribute names to register when byte content is parsed.
    pub fn set_id_attrs(&mut self, id_attrs: Vec<String>) {
        self.id_attrs = id_attrs;
    }

    pub fn id_attrs(&self) -> &[String] {
        &self.id_attrs
    }

    pub fn is_byte_form(&self) -> bool {
        matches!(self.form, InputForm::Stream(_) | InputForm::Bytes(_))
    }

    pub fn is_node_form(&self) -> bool {
        !self.is_byte_form()
    }

    /// True if either representation holds data.
    pub fn is_initialized(&self) -> bool {
        match &self.form {
            InputForm::Stream(_) | InputForm::Subtree { .. } => true,
            InputForm::Bytes(b) => !b.is_empty(),
            InputForm::NodeSet(nodes) => !nodes.nodes.is_empty(),
        }
    }

    /// The document behind a node form.
    pub fn document(&self) -> Option<&Arc<XmlDocument>> {
        match &self.form {
            InputForm::Subtree { doc, .. } => Some(doc),
            InputForm::NodeSet(nodes) => Some(&nodes.doc),
            _ => None,
        }
    }

    pub fn node_filters(&self) -> &[Arc<dyn NodeFilter>] {
        &self.filters
    }

    /// Register a node filter.  A byte-form input is parsed first, since
    /// filters only apply to a node graph.
    pub fn add_node_filter(&mut self, filter: Arc<dyn NodeFilter>) -> Result<(), Error> {
        if self.is_byte_form() {
            self.to_node_form()?;
        }
        self.filters.push(filter);
        self.filters_pending = true;
        self.canonical = None;
        Ok(())
    }

    fn drain_stream(&mut self) -> Result<(), Error> {
        if let InputForm::Stream(reader) = &mut self.form {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            self.form = InputForm::Bytes(buf);
        }
        Ok(())
    }

    /// The input as bytes, canonicalizing the node form if needed.
    pub fn as_bytes(&mut self) -> Result<&[u8], Error> {
        self.drain_stream()?;
        if self.is_node_form() && self.canonical.is_none() {
            let bytes = self.canonicalize(self.c14n_mode, &[])?;
            tracing::trace!(len = bytes.len(), mode = ?self.c14n_mode, "canonicalized node-form input");
            self.canonical = Some(bytes);
        }
        match &self.form {
            InputForm::Bytes(bytes) => Ok(bytes.as_slice()),
            _ => Ok(self.canonical.as_deref().unwrap_or_default()),
        }
    }

    /// Canonicalize the node form with an explicit mode, without caching.
    /// A byte-form input is parsed first.
    pub fn canonicalize(&mut self, mode: C14nMode, inclusive_prefixes: &[String]) -> Result<Vec<u8>, Error> {
        if self.is_byte_form() {
            self.to_node_form()?;
        }
        let (doc, base) = self.node_view()?;
        let parsed = doc.parse_doc()?;
        let set = apply_filters(&parsed, &base, &self.filters);
        ulriksdal_c14n::canonicalize_doc(&parsed, mode, Some(&set), inclusive_prefixes)
    }

    /// The input as a node set.
    ///
    /// Byte input is parsed (destructively).  With `expand`, filters
    /// registered after an earlier materialization are applied again.
    pub fn as_node_set(&mut self, expand: bool) -> Result<&XmlNodes, Error> {
        if self.is_byte_form() {
            self.to_node_form()?;
        }
        let materialize = match &self.form {
            InputForm::Subtree { .. } => true,
            _ => expand && self.filters_pending,
        };
        if materialize {
            let (doc, base) = self.node_view()?;
            let parsed = doc.parse_doc()?;
            let nodes = apply_filters(&parsed, &base, &self.filters);
            drop(parsed);
            self.form = InputForm::NodeSet(XmlNodes::new(doc, nodes));
            self.filters_pending = false;
        }
        match &self.form {
            InputForm::NodeSet(nodes) => Ok(nodes),
            _ => Err(Error::Transform("input has no node-set form".into())),
        }
    }

    /// The document and unfiltered node set of a node form.
    fn node_view(&self) -> Result<(Arc<XmlDocument>, NodeSet), Error> {
        match &self.form {
            InputForm::Subtree {
                doc,
                root,
                exclude,
                with_comments,
            } => {
                let parsed = doc.parse_doc()?;
                let root_node = parsed
                    .get_node(roxmltree::NodeId::new(*root as u32))
                    .ok_or_else(|| Error::XmlStructure(format!("no node with index {root}")))?;
                let mut set = if *with_comments {
                    NodeSet::tree_with_comments(root_node)
                } else {
                    NodeSet::tree_without_comments(root_node)
                };
                if let Some(excluded) = exclude
                    .and_then(|idx| parsed.get_node(roxmltree::NodeId::new(idx as u32)))
                {
                    set.remove_subtree(excluded);
                }
                Ok((Arc::clone(doc), set))
            }
            InputForm::NodeSet(nodes) => Ok((Arc::clone(&nodes.doc), nodes.nodes.clone())),
            _ => Err(Error::Transform("input has no node form".into())),
        }
    }

    /// Parse byte form into a subtree form, dropping the bytes.
    fn to_node_form(&mut self) -> Result<(), Error> {
        self.drain_stream()?;
        let bytes = match std::mem::replace(&mut self.form, InputForm::Bytes(Vec::new())) {
            InputForm::Bytes(bytes) => bytes,
            other => {
                self.form = other;
                return Ok(());
            }
        };
        if bytes.is_empty() {
            return Err(Error::XmlParse("no content to parse".into()));
        }
        self.form = match parse_with_id_attrs(&bytes, &self.id_attrs) {
            Ok(doc) => {
                let root = node_index(doc.parse_doc()?.root());
                InputForm::Subtree {
                    doc: Arc::new(doc),
                    root,
                    exclude: None,
                    with_comments: true,
                }
            }
            Err(err) if self.legacy_recovery => {
                tracing::debug!(error = %err, "content is not well-formed, retrying inside a wrapper element");
                recover_fragment(&bytes, &self.id_attrs).map_err(|_| err)?
            }
            Err(err) => return Err(err),
        };
        self.canonical = None;
        Ok(())
    }

    /// Replace the content with `bytes`, keeping source URI, MIME type, ID
    /// attribute names and the recovery setting.
    pub fn replace_bytes(self, bytes: Vec<u8>) -> Self {
        Self {
            form: InputForm::Bytes(bytes),
            canonical: None,
            filters: Vec::new(),
            filters_pending: false,
            c14n_mode: C14nMode::Inclusive,
            ..self
        }
    }

    /// Copy this input, reading a pending stream into memory first.
    pub fn try_clone(&mut self) -> Result<DualFormInput, Error> {
        self.drain_stream()?;
        let form = match &self.form {
            InputForm::Stream(_) => InputForm::Bytes(Vec::new()),
            InputForm::Bytes(b) => InputForm::Bytes(b.clone()),
            InputForm::Subtree {
                doc,
                root,
                exclude,
                with_comments,
            } => InputForm::Subtree {
                doc: Arc::clone(doc),
                root: *root,
                exclude: *exclude,
                with_comments: *with_comments,
            },
            InputForm::NodeSet(nodes) => InputForm::NodeSet(nodes.clone()),
        };
        Ok(DualFormInput {
            form,
            canonical: self.canonical.clone(),
            filters: self.filters.clone(),
            filters_pending: self.filters_pending,
            c14n_mode: self.c14n_mode,
            source_uri: self.source_uri.clone(),
            mime_type: self.mime_type.clone(),
            legacy_recovery: self.legacy_recovery,
            id_attrs: self.id_attrs.clone(),
        })
    }
}

fn parse_with_id_attrs(bytes: &[u8], id_attrs: &[String]) -> Result<XmlDocument, Error> {
    let mut doc = XmlDocument::parse_bytes(bytes)?;
    for name in id_attrs {
        doc.add_id_attr(name);
    }
    Ok(doc)
}

/// Wrap malformed content in a synthetic root and keep the wrapper's first
/// child's first child, the shape older verifiers produced for such input.
fn recover_fragment(bytes: &[u8], id_attrs: &[String]) -> Result<InputForm, Error> {
    let mut wrapped = Vec::with_capacity(bytes.len() + 2 * RECOVERY_WRAPPER.len() + 5);
    wrapped.extend_from_slice(format!("<{RECOVERY_WRAPPER}>").as_bytes());
    wrapped.extend_from_slice(bytes);
    wrapped.extend_from_slice(format!("</{RECOVERY_WRAPPER}>").as_bytes());

    let doc = parse_with_id_attrs(&wrapped, id_attrs)?;
    let root = {
        let parsed = doc.parse_doc()?;
        let node = parsed
            .root_element()
            .first_child()
            .and_then(|n| n.first_child())
            .ok_or_else(|| Error::XmlParse("recovered content has no nested node".into()))?;
        node_index(node)
    };
    Ok(InputForm::Subtree {
        doc: Arc::new(doc),
        root,
        exclude: None,
        with_comments: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulriksdal_xml::SubtreeExclusionFilter;

    fn doc(xml: &str) -> Arc<XmlDocument> {
        Arc::new(XmlDocument::parse(xml.to_owned()).unwrap())
    }

    fn element_index(doc: &XmlDocument, name: &str) -> usize {
        let parsed = doc.parse_doc().unwrap();
        let node = parsed.descendants().find(|n| n.has_tag_name(name)).unwrap();
        node_index(node)
    }

    #[test]
    fn test_stream_is_read_once_into_bytes() {
        let mut input = DualFormInput::from_stream(std::io::Cursor::new(b"abc".to_vec()));
        assert!(input.is_byte_form());
        assert_eq!(input.as_bytes().unwrap(), b"abc");
        assert!(matches!(input.form(), InputForm::Bytes(_)));
        assert_eq!(input.as_bytes().unwrap(), b"abc");
    }

    #[test]
    fn test_node_to_bytes_is_cached_and_non_destructive() {
        let d = doc("<r><a x=\"1\">t</a><!--c--></r>");
        let a = element_index(&d, "a");
        let mut input = DualFormInput::from_subtree(d, a, false);
        let first = input.as_bytes().unwrap().to_vec();
        assert_eq!(first, b"<a x=\"1\">t</a>");
        let second_ptr = input.as_bytes().unwrap().as_ptr();
        let third_ptr = input.as_bytes().unwrap().as_ptr();
        assert_eq!(second_ptr, third_ptr);
        assert!(input.is_node_form());
    }

    #[test]
    fn test_bytes_to_nodes_is_destructive() {
        let mut input = DualFormInput::from_bytes(b"<r><a/></r>".to_vec());
        let nodes = input.as_node_set(false).unwrap();
        assert!(!nodes.nodes.is_empty());
        assert!(input.is_node_form());
        assert!(input.document().is_some());
        assert_eq!(input.as_bytes().unwrap(), b"<r><a></a></r>");
    }

    #[test]
    fn test_filter_forces_node_form_and_survives() {
        let mut input = DualFormInput::from_bytes(b"<r><s><x/></s><y/></r>".to_vec());
        // The index is that of <s> in the re-parsed document.
        let parsed_index = {
            let d = XmlDocument::parse("<r><s><x/></s><y/></r>".into()).unwrap();
            element_index(&d, "s")
        };
        input
            .add_node_filter(Arc::new(SubtreeExclusionFilter::new(parsed_index)))
            .unwrap();
        assert!(input.is_node_form());
        assert_eq!(input.as_bytes().unwrap(), b"<r><y></y></r>");
        let nodes = input.as_node_set(false).unwrap();
        let parsed = nodes.doc.parse_doc().unwrap();
        assert!(!parsed
            .descendants()
            .filter(|n| n.has_tag_name("x"))
            .any(|n| nodes.nodes.contains(&n)));
    }

    #[test]
    fn test_late_filter_applied_on_expand() {
        let d = doc("<r><s/><y/></r>");
        let s = element_index(&d, "s");
        let mut input = DualFormInput::from_subtree(d, 0, false);
        let before = input.as_node_set(false).unwrap().nodes.len();
        input
            .add_node_filter(Arc::new(SubtreeExclusionFilter::new(s)))
            .unwrap();
        assert_eq!(input.as_node_set(false).unwrap().nodes.len(), before);
        assert_eq!(input.as_node_set(true).unwrap().nodes.len(), before - 1);
    }

    #[test]
    fn test_subtree_exclusion() {
        let d = doc("<r><a/><b/></r>");
        let b = element_index(&d, "b");
        let mut input = DualFormInput::from_subtree_excluding(d, 0, b, false);
        assert_eq!(input.as_bytes().unwrap(), b"<r><a></a></r>");
    }

    #[test]
    fn test_malformed_content_recovery() {
        let mut input = DualFormInput::from_bytes(b"<a><b>t</b></a><c/>".to_vec());
        let nodes = input.as_node_set(false).unwrap();
        let parsed = nodes.doc.parse_doc().unwrap();
        let members: Vec<_> = nodes.nodes.in_document_order(&parsed);
        assert!(members[0].has_tag_name("b"));
        assert_eq!(input.as_bytes().unwrap(), b"<b>t</b>");
    }

    #[test]
    fn test_recovery_disabled_or_shapeless_fails() {
        let mut strict = DualFormInput::from_bytes(b"<a><b/></a><c/>".to_vec());
        strict.set_legacy_recovery(false);
        assert!(matches!(strict.as_node_set(false), Err(Error::XmlParse(_))));

        let mut text_only = DualFormInput::from_bytes(b"just text".to_vec());
        assert!(matches!(text_only.as_node_set(false), Err(Error::XmlParse(_))));
    }

    #[test]
    fn test_parsed_bytes_register_id_attrs() {
        let xml = b"<r><e myid=\"x\">t</e></r>".to_vec();

        let mut plain = DualFormInput::from_bytes(xml.clone());
        let nodes = plain.as_node_set(false).unwrap();
        let parsed = nodes.doc.parse_doc().unwrap();
        assert!(nodes.doc.resolve_id(&parsed, "x", true).is_err());

        let mut input = DualFormInput::from_bytes(xml);
        input.set_id_attrs(vec!["myid".into()]);
        assert_eq!(input.id_attrs(), ["myid".to_owned()]);
        let nodes = input.as_node_set(false).unwrap();
        let parsed = nodes.doc.parse_doc().unwrap();
        let e = nodes.doc.resolve_id(&parsed, "x", true).unwrap();
        assert!(e.has_tag_name("e"));
    }

    #[test]
    fn test_recovered_fragment_registers_id_attrs() {
        let mut input = DualFormInput::from_bytes(b"<a><b ref=\"k\"/></a><c/>".to_vec());
        input.set_id_attrs(vec!["ref".into()]);
        let nodes = input.as_node_set(false).unwrap();
        let parsed = nodes.doc.parse_doc().unwrap();
        assert!(nodes.doc.resolve_id(&parsed, "k", true).unwrap().has_tag_name("b"));
    }

    #[test]
    fn test_is_initialized() {
        assert!(!DualFormInput::empty().is_initialized());
        assert!(DualFormInput::from_bytes(vec![1]).is_initialized());
        let d = doc("<r/>");
        assert!(!DualFormInput::from_node_set(XmlNodes::new(d, NodeSet::new())).is_initialized());
    }

    #[test]
    fn test_try_clone_keeps_form() {
        let mut input = DualFormInput::from_stream(std::io::Cursor::new(b"xyz".to_vec()))
            .with_source_uri("urn:x");
        let mut copy = input.try_clone().unwrap();
        assert_eq!(copy.as_bytes().unwrap(), b"xyz");
        assert_eq!(copy.source_uri(), Some("urn:x"));
        assert_eq!(input.as_bytes().unwrap(), b"xyz");
    }
}
