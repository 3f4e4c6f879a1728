#![forbid(unsafe_code)]

//! A single `<ds:Reference>`.
//!
//! Verification runs dereference → transforms → digest → comparison and
//! records the outcome; later calls return the recorded outcome.

use std::sync::Arc;

use base64::Engine;
use ulriksdal_core::{algorithm, ns, Error, FailedReference};
use ulriksdal_crypto::digests_equal;
use ulriksdal_transforms::{
    enforce_secure_validation, DualFormInput, SignatureLocation, TransformContext,
    TransformPipeline, Transforms,
};
use ulriksdal_xml::document::{find_child_element, is_element_named};
use ulriksdal_xml::nodeset::node_index;
use ulriksdal_xml::writer::XmlWriter;
use ulriksdal_xml::XmlDocument;

use crate::context::VerifyContext;
use crate::resolver::{self, ResolverScope};

/// Processing state of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceState {
    Unresolved,
    Dereferenced,
    Transformed,
    Digested,
    Verified(bool),
}

/// Access to a reference's `Type` attribute.
pub trait ReferenceType {
    fn type_uri(&self) -> Option<&str>;

    /// Whether the reference claims to point at a `<ds:Manifest>`.
    fn points_to_manifest(&self) -> bool {
        self.type_uri() == Some(ns::TYPE_MANIFEST)
    }

    /// Whether the reference claims to point at a `<ds:Object>`.
    fn points_to_object(&self) -> bool {
        self.type_uri() == Some(ns::TYPE_OBJECT)
    }
}

/// A reference to signed content.
#[derive(Debug)]
pub struct Reference {
    doc: Arc<XmlDocument>,
    signature: Option<SignatureLocation>,
    secure_validation: bool,
    base_uri: Option<String>,
    uri: Option<String>,
    id: Option<String>,
    type_uri: Option<String>,
    mime_type: Option<String>,
    digest_algorithm: String,
    transforms: Transforms,
    expected_digest: Option<Vec<u8>>,
    computed_digest: Option<Vec<u8>>,
    state: ReferenceState,
    dereferenced: Option<DualFormInput>,
    pre_digest: Option<Vec<u8>>,
}

impl Reference {
    /// Build a reference to `uri` inside (or relative to) `doc`, with
    /// secure validation on.
    pub fn new(
        doc: Arc<XmlDocument>,
        uri: Option<&str>,
        digest_algorithm: &str,
        transforms: Transforms,
    ) -> Self {
        Self {
            doc,
            signature: None,
            secure_validation: true,
            base_uri: None,
            uri: uri.map(str::to_owned),
            id: None,
            type_uri: None,
            mime_type: None,
            digest_algorithm: digest_algorithm.to_owned(),
            transforms,
            expected_digest: None,
            computed_digest: None,
            state: ReferenceState::Unresolved,
            dereferenced: None,
            pre_digest: None,
        }
    }

    pub fn with_secure_validation(mut self, secure_validation: bool) -> Self {
        self.secure_validation = secure_validation;
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_owned());
        self
    }

    pub fn with_type(mut self, type_uri: &str) -> Self {
        self.type_uri = Some(type_uri.to_owned());
        self
    }

    pub fn with_mime_type(mut self, mime_type: &str) -> Self {
        self.mime_type = Some(mime_type.to_owned());
        self
    }

    pub fn with_base_uri(mut self, base_uri: Option<String>) -> Self {
        self.base_uri = base_uri;
        self
    }

    /// The signature whose enveloped transforms apply to this reference.
    pub fn with_signature(mut self, signature: SignatureLocation) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Parse a `<ds:Reference>` element of `doc`.
    pub fn from_element(
        doc: &Arc<XmlDocument>,
        node: roxmltree::Node<'_, '_>,
        base_uri: Option<String>,
        secure_validation: bool,
    ) -> Result<Self, Error> {
        if !is_element_named(node, ns::DSIG, ns::node::REFERENCE) {
            return Err(Error::XmlStructure(format!(
                "expected <Reference>, found <{}>",
                node.tag_name().name()
            )));
        }

        let transforms = find_child_element(node, ns::DSIG, ns::node::TRANSFORMS)
            .map(Transforms::from_element)
            .transpose()?
            .unwrap_or_default();

        let digest_method = find_child_element(node, ns::DSIG, ns::node::DIGEST_METHOD)
            .ok_or_else(|| Error::MissingElement("DigestMethod".into()))?;
        let digest_algorithm = digest_method
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute("Algorithm on DigestMethod".into()))?;

        let digest_value = find_child_element(node, ns::DSIG, ns::node::DIGEST_VALUE)
            .ok_or_else(|| Error::MissingElement("DigestValue".into()))?;
        let expected_clean: String = digest_value
            .children()
            .filter(|c| c.is_text())
            .filter_map(|c| c.text())
            .flat_map(str::chars)
            .filter(|c| !c.is_whitespace())
            .collect();
        let expected = base64::engine::general_purpose::STANDARD
            .decode(&expected_clean)
            .map_err(|e| Error::Base64(format!("DigestValue: {e}")))?;

        let signature = node
            .ancestors()
            .find(|n| is_element_named(*n, ns::DSIG, ns::node::SIGNATURE))
            .map(|sig| SignatureLocation {
                doc: Arc::clone(doc),
                node: node_index(sig),
            });

        let reference = Self {
            doc: Arc::clone(doc),
            signature,
            secure_validation,
            base_uri,
            uri: node.attribute(ns::attr::URI).map(str::to_owned),
            id: node.attribute(ns::attr::ID).map(str::to_owned),
            type_uri: node.attribute(ns::attr::TYPE).map(str::to_owned),
            mime_type: None,
            digest_algorithm: digest_algorithm.to_owned(),
            transforms,
            expected_digest: Some(expected),
            computed_digest: None,
            state: ReferenceState::Unresolved,
            dereferenced: None,
            pre_digest: None,
        };
        reference.check_policy()?;
        Ok(reference)
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn base_uri(&self) -> Option<&str> {
        self.base_uri.as_deref()
    }

    pub fn digest_algorithm(&self) -> &str {
        &self.digest_algorithm
    }

    pub fn transforms(&self) -> &Transforms {
        &self.transforms
    }

    /// Whether this reference is processed under secure validation.
    pub fn secure_validation(&self) -> bool {
        self.secure_validation
    }

    pub(crate) fn set_secure_validation(&mut self, secure_validation: bool) {
        self.secure_validation = secure_validation;
    }

    pub fn state(&self) -> ReferenceState {
        self.state
    }

    /// The expected digest, from `DigestValue` or from `generate_digest`.
    pub fn digest_value(&self) -> Option<&[u8]> {
        self.expected_digest.as_deref()
    }

    /// The digest computed by the last verification or generation.
    pub fn computed_digest(&self) -> Option<&[u8]> {
        self.computed_digest.as_deref()
    }

    /// Pre-digest bytes, kept when reference caching is enabled.
    pub fn referenced_bytes(&self) -> Option<&[u8]> {
        self.pre_digest.as_deref()
    }

    /// The dereferenced input, kept when reference caching is enabled.
    pub fn dereferenced_input(&self) -> Option<&DualFormInput> {
        self.dereferenced.as_ref()
    }

    pub fn type_is_reference_to_manifest(&self) -> bool {
        self.points_to_manifest()
    }

    pub fn type_is_reference_to_object(&self) -> bool {
        self.points_to_object()
    }

    pub fn failed_reference(&self) -> FailedReference {
        FailedReference {
            uri: self.uri.clone(),
            id: self.id.clone(),
            type_uri: self.type_uri.clone(),
            digest_algorithm: self.digest_algorithm.clone(),
        }
    }

    // ── Error shaping ────────────────────────────────────────────────

    pub(crate) fn not_initialized(&self, source: Error) -> Error {
        Error::ReferenceNotInitialized {
            reference: Box::new(self.failed_reference()),
            source: Box::new(source),
        }
    }

    pub(crate) fn missing_resource(&self, source: Error) -> Error {
        let reason = match &source {
            Error::ReferenceNotInitialized { source: inner, .. } => inner.to_string(),
            other => other.to_string(),
        };
        Error::MissingResource {
            reference: Box::new(self.failed_reference()),
            reason,
            source: Some(Box::new(source)),
        }
    }

    /// Algorithm and policy errors pass through; anything else means the
    /// content could not be produced.
    fn processing_error(&self, err: Error) -> Error {
        match err {
            Error::UnsupportedAlgorithm(_)
            | Error::SecureValidation(_)
            | Error::TooManyTransforms { .. }
            | Error::ReferenceNotInitialized { .. } => err,
            other => self.not_initialized(other),
        }
    }

    fn check_policy(&self) -> Result<(), Error> {
        if !self.secure_validation {
            return Ok(());
        }
        if algorithm::FORBIDDEN_SECURE_DIGESTS.contains(&self.digest_algorithm.as_str()) {
            return Err(Error::SecureValidation(format!(
                "digest algorithm {} is not allowed",
                self.digest_algorithm
            )));
        }
        enforce_secure_validation(&self.transforms)
    }

    fn transform_context(&self) -> TransformContext {
        TransformContext {
            signature: self.signature.clone(),
            secure_validation: self.secure_validation,
        }
    }

    // ── Processing ───────────────────────────────────────────────────

    pub(crate) fn dereference_with(
        &self,
        ctx: &VerifyContext,
        scope: &ResolverScope<'_>,
    ) -> Result<DualFormInput, Error> {
        let mut input = resolver::resolve(
            ctx,
            scope,
            self.uri.as_deref(),
            self.base_uri.as_deref(),
            &self.doc,
            self.secure_validation,
        )
        .map_err(|e| match e {
            Error::SecureValidation(_) => e,
            other => self.not_initialized(other),
        })?;
        if !input.is_initialized() {
            return Err(self.not_initialized(Error::Resolution {
                uri: self.uri.clone().unwrap_or_default(),
                reason: "dereferenced content is empty".into(),
            }));
        }
        input.set_legacy_recovery(ctx.legacy_fragment_recovery);
        input.set_id_attrs(ctx.id_attrs.clone());
        Ok(input)
    }

    /// The dereferenced content, before any transform.
    pub fn contents_before_transformation(&self, ctx: &VerifyContext) -> Result<DualFormInput, Error> {
        self.dereference_with(ctx, &ResolverScope::empty())
    }

    /// The dereferenced content after the whole transform chain.
    pub fn contents_after_transformation(&self, ctx: &VerifyContext) -> Result<DualFormInput, Error> {
        self.contents_after_transformation_with(ctx, &ResolverScope::empty())
    }

    pub(crate) fn contents_after_transformation_with(
        &self,
        ctx: &VerifyContext,
        scope: &ResolverScope<'_>,
    ) -> Result<DualFormInput, Error> {
        self.check_policy()?;
        let pipeline = TransformPipeline::from_transforms(&self.transforms, &ctx.transforms)?;
        let input = self.dereference_with(ctx, scope)?;
        pipeline
            .apply(input, &self.transform_context())
            .map_err(|e| self.processing_error(e))
    }

    /// The content after the transforms preceding the first
    /// canonicalization step.
    pub fn nodeset_before_first_canonicalization(
        &self,
        ctx: &VerifyContext,
    ) -> Result<DualFormInput, Error> {
        self.check_policy()?;
        let pipeline = TransformPipeline::from_transforms(&self.transforms, &ctx.transforms)?;
        let input = self.dereference_with(ctx, &ResolverScope::empty())?;
        pipeline
            .apply_before_canonicalization(input, &self.transform_context())
            .map_err(|e| self.processing_error(e))
    }

    fn compute_digest(
        &mut self,
        ctx: &VerifyContext,
        scope: &ResolverScope<'_>,
    ) -> Result<Vec<u8>, Error> {
        self.check_policy()?;
        let mut hasher = ctx.digests.lookup(&self.digest_algorithm)?;
        let pipeline = TransformPipeline::from_transforms(&self.transforms, &ctx.transforms)?;

        let mut input = self.dereference_with(ctx, scope)?;
        self.state = ReferenceState::Dereferenced;
        if ctx.cache_references {
            let snapshot = input.try_clone().map_err(|e| self.not_initialized(e))?;
            self.dereferenced = Some(snapshot);
        }

        let mut output = pipeline
            .apply(input, &self.transform_context())
            .map_err(|e| self.processing_error(e))?;
        self.state = ReferenceState::Transformed;

        let bytes = output.as_bytes().map_err(|e| self.processing_error(e))?;
        tracing::debug!(uri = ?self.uri, len = bytes.len(), "pre-digest content");
        if ctx.debug {
            tracing::debug!(content = %String::from_utf8_lossy(bytes), "pre-digest data");
        }
        hasher.update(bytes);
        if ctx.cache_references {
            self.pre_digest = Some(bytes.to_vec());
        }

        let digest = hasher.finalize();
        self.state = ReferenceState::Digested;
        Ok(digest)
    }

    /// Verify the reference using only the context's resolvers.
    pub fn verify(&mut self, ctx: &VerifyContext) -> Result<bool, Error> {
        self.verify_with(ctx, &ResolverScope::empty())
    }

    /// Verify the reference.  The outcome is recorded and returned by every
    /// later call without recomputation.
    ///
    /// Content that cannot be resolved or transformed yields
    /// [`Error::MissingResource`]; a digest mismatch yields `Ok(false)`.
    pub fn verify_with(
        &mut self,
        ctx: &VerifyContext,
        scope: &ResolverScope<'_>,
    ) -> Result<bool, Error> {
        if let ReferenceState::Verified(valid) = self.state {
            return Ok(valid);
        }
        let expected = self
            .expected_digest
            .clone()
            .ok_or_else(|| Error::MissingElement("DigestValue".into()))?;

        let computed = match self.compute_digest(ctx, scope) {
            Ok(digest) => digest,
            Err(err @ Error::ReferenceNotInitialized { .. }) => {
                return Err(self.missing_resource(err))
            }
            Err(err) => return Err(err),
        };

        let valid = digests_equal(&computed, &expected);
        if valid {
            tracing::debug!(uri = ?self.uri, "reference digest matches");
        } else {
            tracing::warn!(uri = ?self.uri, id = ?self.id, "reference digest mismatch");
        }
        self.computed_digest = Some(computed);
        self.state = ReferenceState::Verified(valid);
        Ok(valid)
    }

    /// Compute the digest and store it as the expected value.
    pub fn generate_digest(&mut self, ctx: &VerifyContext) -> Result<Vec<u8>, Error> {
        self.generate_digest_with(ctx, &ResolverScope::empty())
    }

    pub(crate) fn generate_digest_with(
        &mut self,
        ctx: &VerifyContext,
        scope: &ResolverScope<'_>,
    ) -> Result<Vec<u8>, Error> {
        let digest = self.compute_digest(ctx, scope)?;
        self.expected_digest = Some(digest.clone());
        self.computed_digest = Some(digest.clone());
        Ok(digest)
    }

    // ── Serialization ────────────────────────────────────────────────

    pub(crate) fn write(&self, w: &mut XmlWriter, declare_ns: bool) {
        let xmlns = format!("xmlns:{}", ns::DSIG_PREFIX);
        let mut attrs: Vec<(&str, &str)> = Vec::new();
        if declare_ns {
            attrs.push((xmlns.as_str(), ns::DSIG));
        }
        if let Some(id) = &self.id {
            attrs.push((ns::attr::ID, id.as_str()));
        }
        if let Some(uri) = &self.uri {
            attrs.push((ns::attr::URI, uri.as_str()));
        }
        if let Some(type_uri) = &self.type_uri {
            attrs.push((ns::attr::TYPE, type_uri.as_str()));
        }
        w.start_element(&ds(ns::node::REFERENCE), &attrs);
        if !self.transforms.is_empty() {
            self.transforms.write(w, false);
        }
        w.empty_element(
            &ds(ns::node::DIGEST_METHOD),
            &[(ns::attr::ALGORITHM, self.digest_algorithm.as_str())],
        );
        let value = self
            .expected_digest
            .as_deref()
            .map(|d| base64::engine::general_purpose::STANDARD.encode(d))
            .unwrap_or_default();
        w.text_element(&ds(ns::node::DIGEST_VALUE), &[], &value);
        w.end_element();
    }

    /// Standalone `<ds:Reference>` XML carrying the current digest value.
    pub fn to_xml(&self) -> String {
        let mut w = XmlWriter::new();
        self.write(&mut w, true);
        w.into_string()
    }
}

impl ReferenceType for Reference {
    fn type_uri(&self) -> Option<&str> {
        self.type_uri.as_deref()
    }
}

pub(crate) fn ds(local: &str) -> String {
    format!("{}:{local}", ns::DSIG_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulriksdal_transforms::TransformStep;

    const DOC: &str = r#"<root><data Id="d">payload</data></root>"#;

    fn doc() -> Arc<XmlDocument> {
        Arc::new(XmlDocument::parse(DOC.into()).unwrap())
    }

    fn parse_reference(xml: &str, secure: bool) -> Result<Reference, Error> {
        let doc = Arc::new(XmlDocument::parse(xml.to_owned()).unwrap());
        let parsed = doc.parse_doc().unwrap();
        Reference::from_element(&doc, parsed.root_element(), None, secure)
    }

    #[test]
    fn test_generate_then_verify() {
        let ctx = VerifyContext::new();
        let mut r = Reference::new(doc(), Some("#d"), algorithm::SHA256, Transforms::new());
        let digest = r.generate_digest(&ctx).unwrap();
        assert_eq!(
            digest,
            ctx.digests.digest(algorithm::SHA256, b"<data Id=\"d\">payload</data>").unwrap()
        );
        assert_eq!(r.state(), ReferenceState::Digested);
        assert!(r.verify(&ctx).unwrap());
        assert_eq!(r.state(), ReferenceState::Verified(true));
    }

    #[test]
    fn test_generate_digest_is_deterministic() {
        let ctx = VerifyContext::new();
        let mut a = Reference::new(doc(), Some(""), algorithm::SHA1, Transforms::new());
        let mut b = Reference::new(doc(), Some(""), algorithm::SHA1, Transforms::new());
        assert_eq!(a.generate_digest(&ctx).unwrap(), b.generate_digest(&ctx).unwrap());
        assert_eq!(a.generate_digest(&ctx).unwrap(), b.digest_value().unwrap());
    }

    #[test]
    fn test_to_xml_round_trip() {
        let ctx = VerifyContext::new();
        let transforms: Transforms = vec![TransformStep::new(algorithm::C14N)].into_iter().collect();
        let mut r = Reference::new(doc(), Some("#d"), algorithm::SHA256, transforms)
            .with_id("r1")
            .with_type(ns::TYPE_OBJECT);
        r.generate_digest(&ctx).unwrap();
        let back = parse_reference(&r.to_xml(), true).unwrap();
        assert_eq!(back.uri(), Some("#d"));
        assert_eq!(back.id(), Some("r1"));
        assert!(back.type_is_reference_to_object());
        assert!(!back.type_is_reference_to_manifest());
        assert_eq!(back.transforms(), r.transforms());
        assert_eq!(back.digest_value(), r.digest_value());
    }

    #[test]
    fn test_missing_digest_parts() {
        let no_method = format!(
            r#"<ds:Reference xmlns:ds="{}"><ds:DigestValue>AA==</ds:DigestValue></ds:Reference>"#,
            ns::DSIG
        );
        assert!(matches!(
            parse_reference(&no_method, false),
            Err(Error::MissingElement(_))
        ));
        let bad_value = format!(
            r#"<ds:Reference xmlns:ds="{}"><ds:DigestMethod Algorithm="{}"/><ds:DigestValue>!!</ds:DigestValue></ds:Reference>"#,
            ns::DSIG,
            algorithm::SHA1
        );
        assert!(matches!(
            parse_reference(&bad_value, false),
            Err(Error::Base64(_))
        ));
    }

    #[test]
    fn test_md5_rejected_under_secure_validation() {
        let xml = format!(
            r#"<ds:Reference xmlns:ds="{}" URI=""><ds:DigestMethod Algorithm="{}"/><ds:DigestValue>AA==</ds:DigestValue></ds:Reference>"#,
            ns::DSIG,
            algorithm::MD5
        );
        assert!(matches!(
            parse_reference(&xml, true),
            Err(Error::SecureValidation(_))
        ));
        assert!(parse_reference(&xml, false).is_ok());
    }

    #[test]
    fn test_unresolvable_uri_is_missing_resource() {
        let ctx = VerifyContext::new();
        let mut r = Reference::new(doc(), Some("#absent"), algorithm::SHA256, Transforms::new());
        r.expected_digest = Some(vec![0; 32]);
        let err = r.verify(&ctx).unwrap_err();
        assert!(err.is_missing_resource());
        assert_eq!(err.failed_reference().unwrap().uri.as_deref(), Some("#absent"));
        assert_eq!(r.state(), ReferenceState::Unresolved);
    }

    #[test]
    fn test_unsupported_digest_propagates() {
        let ctx = VerifyContext::new();
        let mut r = Reference::new(doc(), Some(""), "urn:no-such-digest", Transforms::new());
        r.expected_digest = Some(vec![0; 4]);
        assert!(matches!(r.verify(&ctx), Err(Error::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn test_cache_references() {
        let mut ctx = VerifyContext::new();
        ctx.cache_references = true;
        let mut r = Reference::new(doc(), Some("#d"), algorithm::SHA256, Transforms::new());
        r.generate_digest(&ctx).unwrap();
        assert_eq!(r.referenced_bytes(), Some(&b"<data Id=\"d\">payload</data>"[..]));
        assert!(r.dereferenced_input().is_some_and(|i| i.is_node_form()));
    }

    #[test]
    fn test_nodeset_before_first_canonicalization() {
        let ctx = VerifyContext::new();
        let transforms: Transforms = vec![
            TransformStep::new(algorithm::BASE64),
            TransformStep::new(algorithm::C14N),
        ]
        .into_iter()
        .collect();
        let xml = r#"<root><b Id="b">PHggICAvPg==</b></root>"#;
        let d = Arc::new(XmlDocument::parse(xml.into()).unwrap());
        let r = Reference::new(d, Some("#b"), algorithm::SHA256, transforms);
        let mut before = r.nodeset_before_first_canonicalization(&ctx).unwrap();
        assert_eq!(before.as_bytes().unwrap(), b"<x   />");
        let mut after = r.contents_after_transformation(&ctx).unwrap();
        assert_eq!(after.as_bytes().unwrap(), b"<x></x>");
        let mut raw = r.contents_before_transformation(&ctx).unwrap();
        assert!(raw.is_node_form());
        assert_eq!(raw.as_bytes().unwrap(), br#"<b Id="b">PHggICAvPg==</b>"#);
    }
}
