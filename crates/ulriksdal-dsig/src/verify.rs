#![forbid(unsafe_code)]

//! Reference verification of signed documents.
//!
//! Processing order:
//! 1. Parse the document, register ID attributes
//! 2. Locate `<Signature>/<SignedInfo>`
//! 3. Verify each `<Reference>` of `SignedInfo` (optionally following
//!    references to nested manifests)
//!
//! `SignatureValue` and `KeyInfo` are not examined.

use std::sync::Arc;

use ulriksdal_core::{ns, Error};
use ulriksdal_xml::document::find_child_element;
use ulriksdal_xml::nodeset::node_index;
use ulriksdal_xml::XmlDocument;

use crate::context::VerifyContext;
use crate::manifest::Manifest;
use crate::reference::ReferenceType;

/// Outcome of one `<Reference>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceOutcome {
    pub uri: Option<String>,
    pub id: Option<String>,
    pub type_uri: Option<String>,
    pub valid: bool,
}

/// Outcome of verifying every reference of a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceReport {
    pub valid: bool,
    pub references: Vec<ReferenceOutcome>,
}

impl ReferenceReport {
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReferenceOutcome> {
        self.references.iter().filter(|r| !r.valid)
    }
}

/// Digest computed for one reference, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestEntry {
    pub uri: Option<String>,
    pub algorithm: String,
    pub pre_digest: Vec<u8>,
    pub computed: Vec<u8>,
    pub expected: Option<Vec<u8>>,
}

impl DigestEntry {
    pub fn matches(&self) -> bool {
        self.expected.as_deref() == Some(self.computed.as_slice())
    }
}

/// Parse `xml` registering the context's extra ID attributes.
pub fn load_document(ctx: &VerifyContext, xml: &str) -> Result<Arc<XmlDocument>, Error> {
    Ok(Arc::new(XmlDocument::parse_with_id_attrs(
        xml.to_owned(),
        &ctx.id_attrs,
    )?))
}

/// The reference list of the first `<Signature>` in `doc`.
pub fn signed_info(ctx: &VerifyContext, doc: &Arc<XmlDocument>) -> Result<Manifest, Error> {
    let parsed = doc.parse_doc()?;
    let sig_node = XmlDocument::find_element(&parsed, ns::DSIG, ns::node::SIGNATURE)
        .ok_or_else(|| Error::MissingElement("Signature".into()))?;
    let signed_info = find_child_element(sig_node, ns::DSIG, ns::node::SIGNED_INFO)
        .ok_or_else(|| Error::MissingElement("SignedInfo".into()))?;
    tracing::debug!(signature = node_index(sig_node), "found SignedInfo");

    let mut manifest = Manifest::from_element(doc, signed_info, ctx.secure_validation)?;
    manifest.set_base_uri(ctx.base_uri.clone());
    Ok(manifest)
}

/// Verify every reference of the document's signature.
pub fn verify_references_in_document(
    ctx: &VerifyContext,
    xml: &str,
    follow_manifests: bool,
) -> Result<ReferenceReport, Error> {
    let doc = load_document(ctx, xml)?;
    let mut manifest = signed_info(ctx, &doc)?;
    let valid = manifest.verify_references(follow_manifests, ctx)?;

    let results = manifest
        .verification_results()
        .map(<[bool]>::to_vec)
        .unwrap_or_default();
    let mut references = Vec::with_capacity(manifest.len());
    for (index, result) in results.into_iter().enumerate() {
        let reference = manifest.item(index)?;
        references.push(ReferenceOutcome {
            uri: reference.uri().map(str::to_owned),
            id: reference.id().map(str::to_owned),
            type_uri: reference.type_uri().map(str::to_owned),
            valid: result,
        });
    }
    Ok(ReferenceReport { valid, references })
}

/// Compute each reference's pre-digest content and digest without
/// comparing.
pub fn digest_report(ctx: &VerifyContext, xml: &str) -> Result<Vec<DigestEntry>, Error> {
    let doc = load_document(ctx, xml)?;
    let mut manifest = signed_info(ctx, &doc)?;
    let mut entries = Vec::with_capacity(manifest.len());
    for index in 0..manifest.len() {
        let pre_digest = manifest.signed_content_item(index, ctx)?;
        let reference = manifest.item(index)?;
        let computed = ctx.digests.digest(reference.digest_algorithm(), &pre_digest)?;
        entries.push(DigestEntry {
            uri: reference.uri().map(str::to_owned),
            algorithm: reference.digest_algorithm().to_owned(),
            pre_digest,
            computed,
            expected: reference.digest_value().map(<[u8]>::to_vec),
        });
    }
    Ok(entries)
}
