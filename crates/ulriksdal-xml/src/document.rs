#![forbid(unsafe_code)]

//! XML document wrapper over roxmltree with ID attribute registration.

use std::collections::HashMap;

use ulriksdal_core::Error;

/// Attribute names registered as IDs on every document.
pub const DEFAULT_ID_ATTRS: [&str; 3] = ["Id", "ID", "id"];

/// An owned XML document.  Stores the text and pre-computed metadata.
///
/// To work with the parsed tree, call [`XmlDocument::parse_doc`] which
/// returns a temporary `roxmltree::Document` borrowing from the text.
/// Node identities (`roxmltree::NodeId`) are stable across re-parses of
/// the same text, so node sets may refer to nodes by index.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    text: String,
    /// Additional ID attribute names to register (beyond `Id`, `ID`, `id`).
    extra_id_attrs: Vec<String>,
}

impl XmlDocument {
    /// Parse and validate XML from a string, taking ownership.
    pub fn parse(text: String) -> Result<Self, Error> {
        roxmltree::Document::parse_with_options(&text, crate::parsing_options())
            .map_err(|e| Error::XmlParse(e.to_string()))?;
        Ok(Self {
            text,
            extra_id_attrs: Vec::new(),
        })
    }

    /// Parse and validate XML from bytes.
    pub fn parse_bytes(data: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(data)
            .map_err(|e| Error::XmlParse(format!("invalid UTF-8: {e}")))?
            .to_owned();
        Self::parse(text)
    }

    /// Same as [`XmlDocument::parse`] but registering extra ID attributes.
    pub fn parse_with_id_attrs(text: String, id_attrs: &[String]) -> Result<Self, Error> {
        let mut doc = Self::parse(text)?;
        doc.extra_id_attrs.extend(id_attrs.iter().cloned());
        Ok(doc)
    }

    /// Get the raw XML text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Register additional ID attribute names (e.g., `"wsu:Id"`).
    pub fn add_id_attr(&mut self, name: &str) {
        self.extra_id_attrs.push(name.to_owned());
    }

    /// Extra ID attribute names registered on this document.
    pub fn id_attrs(&self) -> &[String] {
        &self.extra_id_attrs
    }

    /// Parse the document and return a temporary `roxmltree::Document`.
    ///
    /// This re-parses the XML from the stored text.  Call this once at the
    /// top of a processing step and pass the result down.
    pub fn parse_doc(&self) -> Result<roxmltree::Document<'_>, Error> {
        roxmltree::Document::parse_with_options(&self.text, crate::parsing_options())
            .map_err(|e| Error::XmlParse(e.to_string()))
    }

    fn id_values<'a>(&self, node: roxmltree::Node<'a, 'a>) -> Vec<&'a str> {
        let mut values = Vec::new();
        for attr_name in DEFAULT_ID_ATTRS {
            if let Some(val) = node.attribute(attr_name) {
                values.push(val);
            }
        }
        for attr_name in &self.extra_id_attrs {
            if let Some(val) = find_attribute_by_qname(node, attr_name) {
                values.push(val);
            }
        }
        values
    }

    /// Build the ID → NodeId mapping for a parsed document.
    ///
    /// When an ID occurs more than once, the last occurrence wins; use
    /// [`XmlDocument::resolve_id`] with `unique = true` to reject that.
    pub fn build_id_map(
        &self,
        doc: &roxmltree::Document<'_>,
    ) -> HashMap<String, roxmltree::NodeId> {
        let mut map = HashMap::new();
        for node in doc.descendants().filter(|n| n.is_element()) {
            for val in self.id_values(node) {
                map.insert(val.to_owned(), node.id());
            }
        }
        map
    }

    /// Find the element carrying the given ID value.
    ///
    /// With `unique` set, an ID that appears on more than one element is an
    /// error: such documents are the shape of signature wrapping attacks.
    pub fn resolve_id<'a>(
        &self,
        doc: &'a roxmltree::Document<'a>,
        id: &str,
        unique: bool,
    ) -> Result<roxmltree::Node<'a, 'a>, Error> {
        let mut found: Option<roxmltree::Node<'a, 'a>> = None;
        for node in doc.descendants().filter(|n| n.is_element()) {
            if self.id_values(node).contains(&id) {
                if found.is_some() {
                    if unique {
                        return Err(Error::SecureValidation(format!(
                            "ID \"{id}\" is not unique in the document"
                        )));
                    }
                    tracing::warn!(id, "duplicate ID, using the first match");
                    continue;
                }
                found = Some(node);
            }
        }
        found.ok_or_else(|| Error::InvalidUri(format!("ID not found: {id}")))
    }

    /// Find the first descendant element with the given local name and namespace.
    pub fn find_element<'a>(
        doc: &'a roxmltree::Document<'a>,
        ns: &str,
        local_name: &str,
    ) -> Option<roxmltree::Node<'a, 'a>> {
        doc.descendants().find(|n| is_element_named(*n, ns, local_name))
    }

    /// Find all descendant elements with the given local name and namespace.
    pub fn find_elements<'a>(
        doc: &'a roxmltree::Document<'a>,
        ns: &str,
        local_name: &str,
    ) -> Vec<roxmltree::Node<'a, 'a>> {
        doc.descendants()
            .filter(|n| is_element_named(*n, ns, local_name))
            .collect()
    }
}

/// Whether `node` is an element with the given namespace and local name.
pub fn is_element_named(node: roxmltree::Node<'_, '_>, ns: &str, local_name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local_name
        && node.tag_name().namespace().unwrap_or("") == ns
}

/// First child element with the given namespace and local name.
pub fn find_child_element<'a, 'input>(
    parent: roxmltree::Node<'a, 'input>,
    ns: &str,
    local_name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    parent
        .children()
        .find(|n| is_element_named(*n, ns, local_name))
}

/// All child elements with the given namespace and local name, in order.
pub fn find_child_elements<'a, 'input>(
    parent: roxmltree::Node<'a, 'input>,
    ns: &str,
    local_name: &str,
) -> Vec<roxmltree::Node<'a, 'input>> {
    parent
        .children()
        .filter(|n| is_element_named(*n, ns, local_name))
        .collect()
}

/// Look up an attribute by `prefix:local` or plain `local` name.
fn find_attribute_by_qname<'a>(node: roxmltree::Node<'a, 'a>, qname: &str) -> Option<&'a str> {
    match qname.split_once(':') {
        None => node.attribute(qname),
        Some((prefix, local)) => {
            let ns_uri = node.lookup_namespace_uri(Some(prefix))?;
            node.attribute((ns_uri, local))
        }
    }
}
