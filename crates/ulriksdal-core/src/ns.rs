#![forbid(unsafe_code)]

//! XML namespace, element and attribute names used by the reference engine.

/// XML Digital Signature namespace
pub const DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Preferred prefix when serializing DSig elements.
pub const DSIG_PREFIX: &str = "ds";

/// Exclusive C14N namespace (InclusiveNamespaces)
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// Exclusive C14N prefix used when serializing InclusiveNamespaces.
pub const EXC_C14N_PREFIX: &str = "ec";

/// XML namespace
pub const XML: &str = "http://www.w3.org/XML/1998/namespace";

/// XMLNS namespace
pub const XMLNS: &str = "http://www.w3.org/2000/xmlns/";

// ── Element names ────────────────────────────────────────────────────

pub mod node {
    pub const SIGNATURE: &str = "Signature";
    pub const SIGNED_INFO: &str = "SignedInfo";
    pub const OBJECT: &str = "Object";
    pub const MANIFEST: &str = "Manifest";
    pub const REFERENCE: &str = "Reference";
    pub const TRANSFORMS: &str = "Transforms";
    pub const TRANSFORM: &str = "Transform";
    pub const DIGEST_METHOD: &str = "DigestMethod";
    pub const DIGEST_VALUE: &str = "DigestValue";
    pub const XPATH: &str = "XPath";
    pub const INCLUSIVE_NAMESPACES: &str = "InclusiveNamespaces";
}

// ── Attribute names ──────────────────────────────────────────────────

pub mod attr {
    pub const ID: &str = "Id";
    pub const URI: &str = "URI";
    pub const TYPE: &str = "Type";
    pub const MIME_TYPE: &str = "MimeType";
    pub const ALGORITHM: &str = "Algorithm";
    pub const PREFIX_LIST: &str = "PrefixList";
}

// ── Reference Type URIs ──────────────────────────────────────────────

/// `Type` of a reference whose content is a `<Manifest>`.
pub const TYPE_MANIFEST: &str = "http://www.w3.org/2000/09/xmldsig#Manifest";

/// `Type` of a reference whose content is an `<Object>`.
pub const TYPE_OBJECT: &str = "http://www.w3.org/2000/09/xmldsig#Object";

/// `Type` of a reference whose content is `<SignatureProperties>`.
pub const TYPE_SIGNATURE_PROPERTIES: &str =
    "http://www.w3.org/2000/09/xmldsig#SignatureProperties";
