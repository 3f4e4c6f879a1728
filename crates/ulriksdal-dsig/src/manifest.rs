#![forbid(unsafe_code)]

//! `<ds:Manifest>`: an ordered list of references verified as a unit.
//!
//! `<ds:SignedInfo>` is read the same way, so a signature's own reference
//! list is verified through this type too.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ulriksdal_core::{ns, Error};
use ulriksdal_transforms::{DualFormInput, Transforms};
use ulriksdal_xml::document::{find_child_elements, is_element_named};
use ulriksdal_xml::nodeset::node_index;
use ulriksdal_xml::writer::XmlWriter;
use ulriksdal_xml::XmlDocument;

use crate::context::VerifyContext;
use crate::reference::{ds, Reference, ReferenceType};
use crate::resolver::{ResolverScope, ResourceResolver};

/// Maximum number of references per manifest under secure validation.
pub const MAXIMUM_REFERENCE_COUNT: usize = 30;

/// A reference slot: parsed on first access when it came from an element.
#[derive(Debug)]
struct Entry {
    node: Option<usize>,
    reference: Option<Reference>,
}

/// An ordered list of references.
pub struct Manifest {
    doc: Arc<XmlDocument>,
    id: Option<String>,
    base_uri: Option<String>,
    secure_validation: bool,
    entries: Vec<Entry>,
    results: Option<Vec<bool>>,
    resolvers: Vec<Arc<dyn ResourceResolver>>,
    properties: BTreeMap<String, String>,
}

impl fmt::Debug for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manifest")
            .field("id", &self.id)
            .field("base_uri", &self.base_uri)
            .field("secure_validation", &self.secure_validation)
            .field("references", &self.entries.len())
            .field("results", &self.results)
            .field("resolvers", &self.resolvers.len())
            .field("properties", &self.properties)
            .finish()
    }
}

fn materialize<'e>(
    entry: &'e mut Entry,
    doc: &Arc<XmlDocument>,
    base_uri: Option<&str>,
    secure_validation: bool,
) -> Result<&'e mut Reference, Error> {
    let reference = match (entry.reference.take(), entry.node) {
        (Some(reference), _) => reference,
        (None, Some(index)) => {
            let parsed = doc.parse_doc()?;
            let node = parsed
                .get_node(roxmltree::NodeId::new(index as u32))
                .ok_or_else(|| Error::XmlStructure(format!("no node with index {index}")))?;
            Reference::from_element(doc, node, base_uri.map(str::to_owned), secure_validation)?
        }
        (None, None) => return Err(Error::Other("empty reference slot".into())),
    };
    Ok(entry.reference.insert(reference))
}

impl Manifest {
    /// An empty manifest whose same-document references point into `doc`.
    pub fn new(doc: Arc<XmlDocument>, secure_validation: bool) -> Self {
        Self {
            doc,
            id: None,
            base_uri: None,
            secure_validation,
            entries: Vec::new(),
            results: None,
            resolvers: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Read a `<ds:Manifest>` (or `<ds:SignedInfo>`) element of `doc`.
    ///
    /// The `<ds:Reference>` children are located here but parsed on first
    /// access.
    pub fn from_element(
        doc: &Arc<XmlDocument>,
        node: roxmltree::Node<'_, '_>,
        secure_validation: bool,
    ) -> Result<Self, Error> {
        if !is_element_named(node, ns::DSIG, ns::node::MANIFEST)
            && !is_element_named(node, ns::DSIG, ns::node::SIGNED_INFO)
        {
            return Err(Error::XmlStructure(format!(
                "expected <Manifest> or <SignedInfo>, found <{}>",
                node.tag_name().name()
            )));
        }
        let references = find_child_elements(node, ns::DSIG, ns::node::REFERENCE);
        if references.is_empty() {
            return Err(Error::EmptyManifest);
        }
        if secure_validation && references.len() > MAXIMUM_REFERENCE_COUNT {
            return Err(Error::TooManyReferences {
                count: references.len(),
                max: MAXIMUM_REFERENCE_COUNT,
            });
        }

        let mut manifest = Self::new(Arc::clone(doc), secure_validation);
        manifest.id = node.attribute(ns::attr::ID).map(str::to_owned);
        manifest.entries = references
            .into_iter()
            .map(|r| Entry {
                node: Some(node_index(r)),
                reference: None,
            })
            .collect();
        Ok(manifest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn signed_content_len(&self) -> usize {
        self.len()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    pub fn base_uri(&self) -> Option<&str> {
        self.base_uri.as_deref()
    }

    pub fn set_base_uri(&mut self, base_uri: Option<String>) {
        self.base_uri = base_uri;
    }

    pub fn secure_validation(&self) -> bool {
        self.secure_validation
    }

    /// Append a reference. It takes on this manifest's secure validation
    /// setting.
    pub fn add_reference(&mut self, mut reference: Reference) {
        reference.set_secure_validation(self.secure_validation);
        self.entries.push(Entry {
            node: None,
            reference: Some(reference),
        });
        self.results = None;
    }

    /// Build and append a reference to `uri`.
    pub fn add_document(
        &mut self,
        uri: Option<&str>,
        transforms: Transforms,
        digest_algorithm: &str,
        id: Option<&str>,
        type_uri: Option<&str>,
    ) {
        let mut reference = Reference::new(Arc::clone(&self.doc), uri, digest_algorithm, transforms)
            .with_base_uri(self.base_uri.clone())
            .with_secure_validation(self.secure_validation);
        if let Some(id) = id {
            reference = reference.with_id(id);
        }
        if let Some(type_uri) = type_uri {
            reference = reference.with_type(type_uri);
        }
        self.add_reference(reference);
    }

    /// Resolvers tried before the context's for this manifest's references.
    pub fn add_resource_resolver(&mut self, resolver: Arc<dyn ResourceResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn set_resolver_property(&mut self, key: &str, value: &str) {
        self.properties.insert(key.to_owned(), value.to_owned());
    }

    pub fn resolver_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn resolver_properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    fn check_index(&self, index: usize) -> Result<(), Error> {
        if index >= self.entries.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                len: self.entries.len(),
            });
        }
        Ok(())
    }

    /// The reference at `index`, parsing it on first access.
    pub fn item(&mut self, index: usize) -> Result<&mut Reference, Error> {
        self.check_index(index)?;
        materialize(
            &mut self.entries[index],
            &self.doc,
            self.base_uri.as_deref(),
            self.secure_validation,
        )
    }

    /// Per-reference outcomes of the last verification.
    pub fn verification_results(&self) -> Option<&[bool]> {
        self.results.as_deref()
    }

    /// Verify every reference, optionally following references typed as
    /// manifests into the manifests they point at.
    ///
    /// A digest mismatch does not stop the loop; the overall result is
    /// `false` if any reference (or followed manifest) fails.
    pub fn verify_references(&mut self, follow_manifests: bool, ctx: &VerifyContext) -> Result<bool, Error> {
        self.verify_at(follow_manifests, ctx, 0)
    }

    fn verify_at(&mut self, follow_manifests: bool, ctx: &VerifyContext, depth: usize) -> Result<bool, Error> {
        if depth > ctx.max_manifest_depth {
            return Err(Error::TooDeep {
                max: ctx.max_manifest_depth,
            });
        }
        let len = self.entries.len();
        if len == 0 {
            return Err(Error::EmptyManifest);
        }
        if self.secure_validation && len > MAXIMUM_REFERENCE_COUNT {
            return Err(Error::TooManyReferences {
                count: len,
                max: MAXIMUM_REFERENCE_COUNT,
            });
        }
        tracing::debug!(references = len, depth, id = ?self.id, "verifying manifest");

        self.results = Some(vec![false; len]);
        let mut all_valid = true;
        for index in 0..len {
            let reference = materialize(
                &mut self.entries[index],
                &self.doc,
                self.base_uri.as_deref(),
                self.secure_validation,
            )?;
            let scope = ResolverScope::new(&self.resolvers, &self.properties);

            let valid = reference.verify_with(ctx, &scope)?;
            if let Some(results) = self.results.as_mut() {
                results[index] = valid;
            }
            if !valid {
                all_valid = false;
            }

            if all_valid && follow_manifests && reference.points_to_manifest() {
                tracing::debug!(uri = ?reference.uri(), "following reference to nested manifest");
                if !verify_nested(reference, ctx, &scope, depth)? {
                    tracing::warn!(uri = ?reference.uri(), "nested manifest failed verification");
                    all_valid = false;
                }
            }
        }
        Ok(all_valid)
    }

    /// The outcome for the reference at `index`, verifying (without
    /// following manifests) if that has not happened yet.
    pub fn verification_result(&mut self, index: usize, ctx: &VerifyContext) -> Result<bool, Error> {
        self.check_index(index)?;
        if self.results.is_none() {
            self.verify_references(false, ctx)?;
        }
        let results = self.results.as_deref().unwrap_or_default();
        results
            .get(index)
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                index,
                len: results.len(),
            })
    }

    /// Compute and store the digest of every reference.
    pub fn generate_digest_values(&mut self, ctx: &VerifyContext) -> Result<(), Error> {
        for index in 0..self.entries.len() {
            let reference = materialize(
                &mut self.entries[index],
                &self.doc,
                self.base_uri.as_deref(),
                self.secure_validation,
            )?;
            let scope = ResolverScope::new(&self.resolvers, &self.properties);
            reference.generate_digest_with(ctx, &scope)?;
        }
        self.results = None;
        Ok(())
    }

    /// The dereferenced content of the reference at `index`.
    pub fn referenced_content_before_transforms_item(
        &mut self,
        index: usize,
        ctx: &VerifyContext,
    ) -> Result<DualFormInput, Error> {
        self.check_index(index)?;
        let reference = materialize(
            &mut self.entries[index],
            &self.doc,
            self.base_uri.as_deref(),
            self.secure_validation,
        )?;
        let scope = ResolverScope::new(&self.resolvers, &self.properties);
        reference.dereference_with(ctx, &scope)
    }

    /// The transformed content of the reference at `index`.
    pub fn referenced_content_after_transforms_item(
        &mut self,
        index: usize,
        ctx: &VerifyContext,
    ) -> Result<DualFormInput, Error> {
        self.check_index(index)?;
        let reference = materialize(
            &mut self.entries[index],
            &self.doc,
            self.base_uri.as_deref(),
            self.secure_validation,
        )?;
        let scope = ResolverScope::new(&self.resolvers, &self.properties);
        reference.contents_after_transformation_with(ctx, &scope)
    }

    /// The bytes that were digested for the reference at `index`.
    pub fn signed_content_item(&mut self, index: usize, ctx: &VerifyContext) -> Result<Vec<u8>, Error> {
        let mut content = self.referenced_content_after_transforms_item(index, ctx)?;
        Ok(content.as_bytes()?.to_vec())
    }

    /// Standalone `<ds:Manifest>` XML with the current digest values.
    pub fn to_xml(&mut self) -> Result<String, Error> {
        let mut w = XmlWriter::new();
        let xmlns = format!("xmlns:{}", ns::DSIG_PREFIX);
        let mut attrs: Vec<(&str, &str)> = vec![(xmlns.as_str(), ns::DSIG)];
        let id = self.id.clone();
        if let Some(id) = &id {
            attrs.push((ns::attr::ID, id.as_str()));
        }
        w.start_element(&ds(ns::node::MANIFEST), &attrs);
        for index in 0..self.entries.len() {
            let reference = materialize(
                &mut self.entries[index],
                &self.doc,
                self.base_uri.as_deref(),
                self.secure_validation,
            )?;
            reference.write(&mut w, false);
        }
        w.end_element();
        Ok(w.into_string())
    }
}

/// Verify the manifest that `reference` points at.
fn verify_nested(
    reference: &Reference,
    ctx: &VerifyContext,
    scope: &ResolverScope<'_>,
    depth: usize,
) -> Result<bool, Error> {
    let mut content = reference
        .contents_after_transformation_with(ctx, scope)
        .map_err(|e| match e {
            Error::ReferenceNotInitialized { .. } => reference.missing_resource(e),
            other => other,
        })?;
    let source_uri = content.source_uri().map(str::to_owned);
    let nodes = content
        .as_node_set(false)
        .map_err(|e| reference.missing_resource(reference.not_initialized(e)))?;

    let mut nested = None;
    {
        let parsed = nodes.doc.parse_doc()?;
        for node in nodes.nodes.in_document_order(&parsed) {
            if !is_element_named(node, ns::DSIG, ns::node::MANIFEST) {
                continue;
            }
            match Manifest::from_element(&nodes.doc, node, reference.secure_validation()) {
                Ok(manifest) => {
                    nested = Some(manifest);
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "skipping Manifest element that does not parse");
                }
            }
        }
    }

    let Some(mut nested) = nested else {
        return Err(Error::MissingResource {
            reference: Box::new(reference.failed_reference()),
            reason: "referenced content contains no Manifest".into(),
            source: None,
        });
    };
    nested.resolvers = scope.resolvers.to_vec();
    nested.properties = scope.properties.clone();
    nested.base_uri = source_uri;
    nested.verify_at(true, ctx, depth + 1)
}
