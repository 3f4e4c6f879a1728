#![forbid(unsafe_code)]

//! Digest algorithms for the Ulriksdal XML-DSig engine.
//!
//! Provides the `DigestAlgorithm` trait, the built-in SHA-1/SHA-2/SHA-3
//! implementations and an explicit `DigestRegistry` mapping algorithm URIs
//! to factories.

pub mod digest;
pub mod registry;

pub use digest::{digests_equal, DigestAlgorithm};
pub use registry::DigestRegistry;
