//! End-to-end reference and manifest verification over signed documents.
//!
//! Fixtures carry `@@NAME@@` placeholders in their `DigestValue`s; the
//! digests are computed at test time, innermost content first, so that a
//! manifest's own digest covers its filled-in references.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use proptest::prelude::*;
use ulriksdal_core::{algorithm, ns, Error};
use ulriksdal_dsig::verify::signed_info;
use ulriksdal_dsig::{
    digest_report, verify_references_in_document, Manifest, MemoryResolver, Reference,
    ReferenceState, ResolverRequest, ResourceResolver, VerifyContext,
};
use ulriksdal_transforms::{DualFormInput, SignatureLocation, TransformStep, Transforms};
use ulriksdal_xml::nodeset::node_index;
use ulriksdal_xml::XmlDocument;

const ZERO_DIGEST: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

fn reference(uri: &str, type_uri: Option<&str>, transforms: &[&str], placeholder: &str) -> String {
    let type_attr = type_uri
        .map(|t| format!(r#" Type="{t}""#))
        .unwrap_or_default();
    let transforms = if transforms.is_empty() {
        String::new()
    } else {
        let steps: String = transforms
            .iter()
            .map(|t| format!(r#"<ds:Transform Algorithm="{t}"/>"#))
            .collect();
        format!("<ds:Transforms>{steps}</ds:Transforms>")
    };
    format!(
        r#"<ds:Reference URI="{uri}"{type_attr}>{transforms}<ds:DigestMethod Algorithm="{}"/><ds:DigestValue>{placeholder}</ds:DigestValue></ds:Reference>"#,
        algorithm::SHA256
    )
}

fn signature(signed_info: &str, objects: &str) -> String {
    format!(
        r#"<ds:Signature xmlns:ds="{}"><ds:SignedInfo>{signed_info}</ds:SignedInfo><ds:SignatureValue>AA==</ds:SignatureValue>{objects}</ds:Signature>"#,
        ns::DSIG
    )
}

fn signature_location(doc: &Arc<XmlDocument>) -> Option<SignatureLocation> {
    let parsed = doc.parse_doc().ok()?;
    let sig = XmlDocument::find_element(&parsed, ns::DSIG, ns::node::SIGNATURE)?;
    Some(SignatureLocation {
        doc: Arc::clone(doc),
        node: node_index(sig),
    })
}

/// Replace `placeholder` with the digest of `uri` as `xml` currently reads.
fn fill(xml: &str, placeholder: &str, uri: &str, transforms: &[&str]) -> String {
    let ctx = VerifyContext::new();
    let doc = Arc::new(XmlDocument::parse(xml.to_owned()).expect("fixture parses"));
    let steps: Transforms = transforms.iter().map(|t| TransformStep::new(*t)).collect();
    let mut r = Reference::new(Arc::clone(&doc), Some(uri), algorithm::SHA256, steps);
    if let Some(sig) = signature_location(&doc) {
        r = r.with_signature(sig);
    }
    let digest = r.generate_digest(&ctx).expect("fixture digest");
    xml.replacen(placeholder, &STANDARD.encode(digest), 1)
}

/// `<doc>` with an object `#a`, a signature over `#m` typed as a manifest,
/// and the manifest `#m` referencing `#a`.
fn nested_manifest_document(inner_digest_valid: bool) -> String {
    let manifest = format!(
        r#"<ds:Object><ds:Manifest Id="m">{}</ds:Manifest></ds:Object>"#,
        reference("#a", None, &[], "@@A@@")
    );
    let xml = format!(
        r#"<doc><a Id="a">alpha</a>{}</doc>"#,
        signature(&reference("#m", Some(ns::TYPE_MANIFEST), &[], "@@M@@"), &manifest)
    );
    let xml = if inner_digest_valid {
        fill(&xml, "@@A@@", "#a", &[])
    } else {
        xml.replacen("@@A@@", ZERO_DIGEST, 1)
    };
    fill(&xml, "@@M@@", "#m", &[])
}

struct CountingResolver {
    inner: MemoryResolver,
    calls: AtomicUsize,
}

impl CountingResolver {
    fn new(inner: MemoryResolver) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResourceResolver for CountingResolver {
    fn can_resolve(&self, request: &ResolverRequest<'_>) -> bool {
        self.inner.can_resolve(request)
    }

    fn resolve(&self, request: &ResolverRequest<'_>) -> Result<DualFormInput, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(request)
    }
}

#[test]
fn test_enveloped_signature_over_whole_document() {
    let ctx = VerifyContext::new();
    let transforms = [algorithm::ENVELOPED_SIGNATURE, algorithm::EXC_C14N];
    let xml = format!(
        r#"<invoice><amount>42</amount>{}</invoice>"#,
        signature(&reference("", None, &transforms, "@@D@@"), "")
    );
    let xml = fill(&xml, "@@D@@", "", &transforms);

    let report = verify_references_in_document(&ctx, &xml, false).unwrap();
    assert!(report.is_valid());
    assert_eq!(report.references.len(), 1);
    assert_eq!(report.references[0].uri.as_deref(), Some(""));

    let tampered = xml.replace("<amount>42</amount>", "<amount>43</amount>");
    let report = verify_references_in_document(&ctx, &tampered, false).unwrap();
    assert!(!report.is_valid());
    assert_eq!(report.failures().count(), 1);
}

#[test]
fn test_per_reference_results_do_not_short_circuit() {
    let ctx = VerifyContext::new();
    let refs = format!(
        "{}{}{}",
        reference("#a", None, &[], "@@A@@"),
        reference("#b", None, &[], ZERO_DIGEST),
        reference("#c", None, &[], "@@C@@"),
    );
    let xml = format!(
        r#"<doc><a Id="a">1</a><b Id="b">2</b><c Id="c">3</c>{}</doc>"#,
        signature(&refs, "")
    );
    let xml = fill(&xml, "@@A@@", "#a", &[]);
    let xml = fill(&xml, "@@C@@", "#c", &[]);

    let doc = Arc::new(XmlDocument::parse(xml).unwrap());
    let mut manifest = signed_info(&ctx, &doc).unwrap();
    assert!(!manifest.verify_references(false, &ctx).unwrap());
    assert_eq!(manifest.verification_results(), Some(&[true, false, true][..]));
    assert!(manifest.verification_result(2, &ctx).unwrap());
    assert!(!manifest.verification_result(1, &ctx).unwrap());
}

#[test]
fn test_reference_verification_is_idempotent() {
    let counting = Arc::new(CountingResolver::new(
        MemoryResolver::new().with_entry("urn:detached", b"detached payload".to_vec()),
    ));
    let mut ctx = VerifyContext::new();
    ctx.add_resolver(counting.clone());

    let doc = Arc::new(XmlDocument::parse("<doc/>".into()).unwrap());
    let mut good = Reference::new(Arc::clone(&doc), Some("urn:detached"), algorithm::SHA256, Transforms::new());
    let digest = good.generate_digest(&ctx).unwrap();
    assert_eq!(counting.calls(), 1);

    assert!(good.verify(&ctx).unwrap());
    assert!(good.verify(&ctx).unwrap());
    assert_eq!(good.state(), ReferenceState::Verified(true));
    assert_eq!(counting.calls(), 2);

    let xml = format!(
        r#"<ds:Reference xmlns:ds="{}" URI="urn:detached"><ds:DigestMethod Algorithm="{}"/><ds:DigestValue>{ZERO_DIGEST}</ds:DigestValue></ds:Reference>"#,
        ns::DSIG,
        algorithm::SHA256
    );
    let rdoc = Arc::new(XmlDocument::parse(xml).unwrap());
    let parsed = rdoc.parse_doc().unwrap();
    let mut bad = Reference::from_element(&rdoc, parsed.root_element(), None, true).unwrap();
    assert!(!bad.verify(&ctx).unwrap());
    assert!(!bad.verify(&ctx).unwrap());
    assert_eq!(counting.calls(), 3);
    assert_eq!(bad.computed_digest(), Some(digest.as_slice()));
}

#[test]
fn test_reference_count_bound() {
    let ctx = VerifyContext::new();
    let doc = Arc::new(XmlDocument::parse(r#"<doc><a Id="a">x</a></doc>"#.into()).unwrap());

    let mut programmatic = Manifest::new(Arc::clone(&doc), true);
    for _ in 0..31 {
        programmatic.add_document(Some("#a"), Transforms::new(), algorithm::SHA256, None, None);
    }
    assert!(matches!(
        programmatic.verify_references(false, &ctx),
        Err(Error::TooManyReferences { count: 31, max: 30 })
    ));

    let refs: String = (0..31).map(|_| reference("#a", None, &[], ZERO_DIGEST)).collect();
    let xml = format!(r#"<doc><a Id="a">x</a>{}</doc>"#, signature(&refs, ""));
    assert!(matches!(
        verify_references_in_document(&ctx, &xml, false),
        Err(Error::TooManyReferences { count: 31, max: 30 })
    ));

    let mut relaxed = Manifest::new(doc, false);
    for _ in 0..31 {
        relaxed.add_document(Some("#a"), Transforms::new(), algorithm::SHA256, None, None);
    }
    relaxed.generate_digest_values(&ctx).unwrap();
    let mut lenient = VerifyContext::new();
    lenient.secure_validation = false;
    assert!(relaxed.verify_references(false, &lenient).unwrap());
    assert_eq!(relaxed.verification_results().map(<[bool]>::len), Some(31));
}

#[test]
fn test_empty_manifest_fails() {
    let ctx = VerifyContext::new();
    let doc = Arc::new(XmlDocument::parse("<doc/>".into()).unwrap());
    for secure in [true, false] {
        let mut m = Manifest::new(Arc::clone(&doc), secure);
        assert!(matches!(m.verify_references(true, &ctx), Err(Error::EmptyManifest)));
    }
    let xml = signature("", "");
    assert!(matches!(
        verify_references_in_document(&ctx, &xml, false),
        Err(Error::EmptyManifest)
    ));
}

#[test]
fn test_nested_manifest_is_followed() {
    let ctx = VerifyContext::new();
    let xml = nested_manifest_document(true);
    assert!(verify_references_in_document(&ctx, &xml, true).unwrap().is_valid());
}

#[test]
fn test_failing_nested_manifest_fails_outer() {
    let ctx = VerifyContext::new();
    let xml = nested_manifest_document(false);

    let shallow = verify_references_in_document(&ctx, &xml, false).unwrap();
    assert!(shallow.is_valid());

    let deep = verify_references_in_document(&ctx, &xml, true).unwrap();
    assert!(!deep.is_valid());
    // the outer reference's own digest still matches
    assert!(deep.references[0].valid);
    assert_eq!(deep.references[0].type_uri.as_deref(), Some(ns::TYPE_MANIFEST));
}

#[test]
fn test_manifest_chain_depth_limit() {
    let objects = format!(
        r#"<ds:Object><ds:Manifest Id="m1">{}</ds:Manifest></ds:Object><ds:Object><ds:Manifest Id="m2">{}</ds:Manifest></ds:Object>"#,
        reference("#m2", Some(ns::TYPE_MANIFEST), &[], "@@M2@@"),
        reference("#a", None, &[], "@@A@@"),
    );
    let xml = format!(
        r#"<doc><a Id="a">alpha</a>{}</doc>"#,
        signature(&reference("#m1", Some(ns::TYPE_MANIFEST), &[], "@@M1@@"), &objects)
    );
    let xml = fill(&xml, "@@A@@", "#a", &[]);
    let xml = fill(&xml, "@@M2@@", "#m2", &[]);
    let xml = fill(&xml, "@@M1@@", "#m1", &[]);

    let ctx = VerifyContext::new();
    assert!(verify_references_in_document(&ctx, &xml, true).unwrap().is_valid());

    let mut shallow = VerifyContext::new();
    shallow.max_manifest_depth = 1;
    assert!(matches!(
        verify_references_in_document(&shallow, &xml, true),
        Err(Error::TooDeep { max: 1 })
    ));
}

#[test]
fn test_reference_typed_as_manifest_without_one() {
    let ctx = VerifyContext::new();
    let xml = format!(
        r#"<doc><a Id="a">alpha</a>{}</doc>"#,
        signature(&reference("#a", Some(ns::TYPE_MANIFEST), &[], "@@A@@"), "")
    );
    let xml = fill(&xml, "@@A@@", "#a", &[]);

    assert!(verify_references_in_document(&ctx, &xml, false).unwrap().is_valid());
    let err = verify_references_in_document(&ctx, &xml, true).unwrap_err();
    assert!(err.is_missing_resource());
    assert_eq!(err.failed_reference().and_then(|r| r.uri.as_deref()), Some("#a"));
}

#[test]
fn test_unresolvable_reference_is_missing_resource() {
    let ctx = VerifyContext::new();
    let xml = format!(
        "<doc>{}</doc>",
        signature(&reference("urn:nowhere", None, &[], ZERO_DIGEST), "")
    );
    let err = verify_references_in_document(&ctx, &xml, false).unwrap_err();
    assert!(err.is_missing_resource());
    assert_eq!(
        err.failed_reference().and_then(|r| r.uri.as_deref()),
        Some("urn:nowhere")
    );
}

#[test]
fn test_missing_resource_can_be_retried() {
    let mut ctx = VerifyContext::new();
    let expected = ctx.digests.digest(algorithm::SHA256, b"late").unwrap();
    let xml = format!(
        r#"<ds:Reference xmlns:ds="{}" URI="urn:late"><ds:DigestMethod Algorithm="{}"/><ds:DigestValue>{}</ds:DigestValue></ds:Reference>"#,
        ns::DSIG,
        algorithm::SHA256,
        STANDARD.encode(&expected)
    );
    let rdoc = Arc::new(XmlDocument::parse(xml).unwrap());
    let parsed = rdoc.parse_doc().unwrap();
    let mut late = Reference::from_element(&rdoc, parsed.root_element(), None, true).unwrap();
    assert!(late.verify(&ctx).unwrap_err().is_missing_resource());
    assert_eq!(late.state(), ReferenceState::Unresolved);

    ctx.add_resolver(Arc::new(MemoryResolver::new().with_entry("urn:late", b"late".to_vec())));
    assert!(late.verify(&ctx).unwrap());
}

#[test]
fn test_secure_validation_rejections() {
    let ctx = VerifyContext::new();
    let six = [algorithm::C14N; 6];
    let xml = format!(
        r#"<doc><a Id="a">x</a>{}</doc>"#,
        signature(&reference("#a", None, &six, ZERO_DIGEST), "")
    );
    assert!(matches!(
        verify_references_in_document(&ctx, &xml, false),
        Err(Error::TooManyTransforms { count: 6, max: 5 })
    ));

    let md5 = format!(
        r#"<doc><a Id="a">x</a>{}</doc>"#,
        signature(
            &reference("#a", None, &[], ZERO_DIGEST).replace(algorithm::SHA256, algorithm::MD5),
            ""
        )
    );
    assert!(matches!(
        verify_references_in_document(&ctx, &md5, false),
        Err(Error::SecureValidation(_))
    ));

    let mut lenient = VerifyContext::new();
    lenient.secure_validation = false;
    let report = verify_references_in_document(&lenient, &xml, false).unwrap();
    assert!(!report.is_valid());
}

#[test]
fn test_secure_manifest_limits_hold_under_lenient_context() {
    let mut lenient = VerifyContext::new();
    lenient.secure_validation = false;
    let doc = Arc::new(XmlDocument::parse(r#"<doc><a Id="a">x</a></doc>"#.to_owned()).unwrap());
    let six: Transforms = (0..6).map(|_| TransformStep::new(algorithm::C14N)).collect();

    let mut built = Manifest::new(Arc::clone(&doc), true);
    built.add_document(Some("#a"), six, algorithm::SHA256, None, None);
    assert!(built.item(0).unwrap().secure_validation());
    assert!(matches!(
        built.generate_digest_values(&lenient),
        Err(Error::TooManyTransforms { count: 6, max: 5 })
    ));

    let mut weak = Manifest::new(Arc::clone(&doc), true);
    weak.add_document(Some("#a"), Transforms::new(), algorithm::MD5, None, None);
    assert!(matches!(
        weak.generate_digest_values(&lenient),
        Err(Error::SecureValidation(_))
    ));

    let steps: String = (0..6)
        .map(|_| format!(r#"<ds:Transform Algorithm="{}"/>"#, algorithm::C14N))
        .collect();
    let xml = format!(
        r#"<ds:Reference xmlns:ds="{}" URI="urn:x"><ds:Transforms>{steps}</ds:Transforms><ds:DigestMethod Algorithm="{}"/><ds:DigestValue>{ZERO_DIGEST}</ds:DigestValue></ds:Reference>"#,
        ns::DSIG,
        algorithm::SHA256
    );
    let rdoc = Arc::new(XmlDocument::parse(xml).unwrap());
    let parsed = rdoc.parse_doc().unwrap();
    let loose = Reference::from_element(&rdoc, parsed.root_element(), None, false).unwrap();
    assert!(!loose.secure_validation());

    let mut adopted = Manifest::new(doc, true);
    adopted.add_reference(loose);
    assert!(matches!(
        adopted.verify_references(false, &lenient),
        Err(Error::TooManyTransforms { count: 6, max: 5 })
    ));
}

#[test]
fn test_custom_id_attr_reaches_nested_manifest_parsed_from_bytes() {
    let mut ctx = VerifyContext::new();
    let payload_digest = ctx
        .digests
        .digest(algorithm::SHA256, br#"<payload myid="payload">p</payload>"#)
        .unwrap();
    let content = format!(
        r#"<wrap><ds:Manifest xmlns:ds="{}">{}</ds:Manifest><payload myid="payload">p</payload></wrap>"#,
        ns::DSIG,
        reference("#payload", None, &[], &STANDARD.encode(&payload_digest))
    )
    .into_bytes();
    let manifest_digest = ctx.digests.digest(algorithm::SHA256, &content).unwrap();
    let xml = format!(
        "<doc>{}</doc>",
        signature(
            &reference(
                "urn:manifest",
                Some(ns::TYPE_MANIFEST),
                &[],
                &STANDARD.encode(&manifest_digest)
            ),
            ""
        )
    );

    ctx.add_resolver(Arc::new(MemoryResolver::new().with_entry("urn:manifest", content)));
    assert!(verify_references_in_document(&ctx, &xml, true)
        .unwrap_err()
        .is_missing_resource());

    ctx.add_id_attr("myid");
    assert!(verify_references_in_document(&ctx, &xml, true).unwrap().is_valid());
}

#[test]
fn test_duplicate_ids_rejected_under_secure_validation() {
    let ctx = VerifyContext::new();
    let xml = format!(
        r#"<doc><a Id="a">1</a><b Id="a">2</b>{}</doc>"#,
        signature(&reference("#a", None, &[], ZERO_DIGEST), "")
    );
    assert!(matches!(
        verify_references_in_document(&ctx, &xml, false),
        Err(Error::SecureValidation(_))
    ));
}

#[test]
fn test_malformed_detached_content_recovery() {
    let content = b"<a><b>t</b></a><c/>".to_vec();
    let expected = VerifyContext::new()
        .digests
        .digest(algorithm::SHA256, b"<b>t</b>")
        .unwrap();
    let xml = format!(
        "<doc>{}</doc>",
        signature(
            &reference("urn:fragment", None, &[algorithm::C14N], &STANDARD.encode(&expected)),
            ""
        )
    );

    let mut ctx = VerifyContext::new();
    ctx.add_resolver(Arc::new(MemoryResolver::new().with_entry("urn:fragment", content)));
    assert!(verify_references_in_document(&ctx, &xml, false).unwrap().is_valid());

    ctx.legacy_fragment_recovery = false;
    let err = verify_references_in_document(&ctx, &xml, false).unwrap_err();
    assert!(err.is_missing_resource());
}

#[test]
fn test_manifest_resolvers_reach_nested_manifest() {
    let manifest = format!(
        r#"<ds:Object><ds:Manifest Id="m">{}</ds:Manifest></ds:Object>"#,
        reference("urn:only-here", None, &[], "@@X@@")
    );
    let xml = format!(
        "<doc>{}</doc>",
        signature(&reference("#m", Some(ns::TYPE_MANIFEST), &[], "@@M@@"), &manifest)
    );
    let content = b"scoped content".to_vec();
    let expected = VerifyContext::new()
        .digests
        .digest(algorithm::SHA256, &content)
        .unwrap();
    let xml = xml.replacen("@@X@@", &STANDARD.encode(expected), 1);
    let xml = fill(&xml, "@@M@@", "#m", &[]);

    let ctx = VerifyContext::new();
    let doc = Arc::new(XmlDocument::parse(xml).unwrap());

    let mut without = signed_info(&ctx, &doc).unwrap();
    assert!(without.verify_references(true, &ctx).unwrap_err().is_missing_resource());

    let mut with = signed_info(&ctx, &doc).unwrap();
    with.add_resource_resolver(Arc::new(
        MemoryResolver::new().with_entry("urn:only-here", content),
    ));
    assert!(with.verify_references(true, &ctx).unwrap());
}

#[test]
fn test_digest_report() {
    let ctx = VerifyContext::new();
    let refs = format!(
        "{}{}",
        reference("#a", None, &[], "@@A@@"),
        reference("#b", None, &[], ZERO_DIGEST)
    );
    let xml = format!(
        r#"<doc><a Id="a">1</a><b Id="b">2</b>{}</doc>"#,
        signature(&refs, "")
    );
    let xml = fill(&xml, "@@A@@", "#a", &[]);

    let entries = digest_report(&ctx, &xml).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].pre_digest, br#"<a Id="a">1</a>"#);
    assert!(entries[0].matches());
    assert!(!entries[1].matches());
    assert_eq!(entries[1].algorithm, algorithm::SHA256);
}

proptest! {
    #[test]
    fn prop_generated_digest_verifies(text in "[a-zA-Z0-9 ]{0,40}") {
        let ctx = VerifyContext::new();
        let xml = format!(r#"<doc><a Id="a">{text}</a></doc>"#);
        let doc = Arc::new(XmlDocument::parse(xml).unwrap());

        let mut m = Manifest::new(Arc::clone(&doc), true);
        m.add_document(Some("#a"), Transforms::new(), algorithm::SHA256, None, None);
        m.generate_digest_values(&ctx).unwrap();
        let first = m.item(0).unwrap().digest_value().map(<[u8]>::to_vec);

        let mut again = Reference::new(doc, Some("#a"), algorithm::SHA256, Transforms::new());
        prop_assert_eq!(first, Some(again.generate_digest(&ctx).unwrap()));
        prop_assert!(m.verify_references(false, &ctx).unwrap());
    }
}
