#![forbid(unsafe_code)]

//! XML Digital Signature reference processing.
//!
//! Resolves, transforms and digests `<Reference>` content and verifies
//! `<Manifest>` and `<SignedInfo>` reference lists, following nested
//! manifests on request.

pub mod context;
pub mod manifest;
pub mod reference;
pub mod resolver;
pub mod verify;

pub use context::VerifyContext;
pub use manifest::{Manifest, MAXIMUM_REFERENCE_COUNT};
pub use reference::{Reference, ReferenceState, ReferenceType};
pub use resolver::{
    LocalFileResolver, MemoryResolver, ResolverRequest, ResolverScope, ResourceResolver,
    SameDocumentResolver, UrlMapResolver,
};
pub use verify::{digest_report, verify_references_in_document, DigestEntry, ReferenceReport};
