#![forbid(unsafe_code)]

//! Verification context: algorithm registries, resolvers and policy.

use std::fmt;
use std::sync::Arc;

use ulriksdal_crypto::DigestRegistry;
use ulriksdal_transforms::TransformRegistry;

use crate::resolver::ResourceResolver;

/// Default bound on nested manifest recursion.
pub const DEFAULT_MAX_MANIFEST_DEPTH: usize = 10;

/// Context for reference and manifest verification.
pub struct VerifyContext {
    /// Digest algorithms available to references.
    pub digests: DigestRegistry,
    /// Transform algorithms available to references.
    pub transforms: TransformRegistry,
    /// Resolvers tried after a manifest's own resolvers.
    pub resolvers: Vec<Arc<dyn ResourceResolver>>,
    /// Additional ID attribute names to register.
    pub id_attrs: Vec<String>,
    /// URL-to-file mappings for external URI resolution.
    pub url_maps: Vec<(String, String)>,
    /// Base directory for resolving relative external URI references.
    pub base_dir: Option<String>,
    /// Base URI of the top-level document.
    pub base_uri: Option<String>,
    /// Enforce reference/transform limits, unique IDs and forbid weak
    /// algorithms. Seeds the top-level manifest; each manifest and
    /// reference then carries its own setting.
    pub secure_validation: bool,
    /// Keep dereferenced input and pre-digest bytes on each reference.
    pub cache_references: bool,
    /// Retry malformed dereferenced content inside a wrapper element.
    pub legacy_fragment_recovery: bool,
    /// Maximum nesting of followed manifests.
    pub max_manifest_depth: usize,
    /// Log pre-digest content.
    pub debug: bool,
}

impl VerifyContext {
    /// A context with the default registries and secure validation on.
    pub fn new() -> Self {
        Self {
            digests: DigestRegistry::with_defaults(),
            transforms: TransformRegistry::with_defaults(),
            resolvers: Vec::new(),
            id_attrs: Vec::new(),
            url_maps: Vec::new(),
            base_dir: None,
            base_uri: None,
            secure_validation: true,
            cache_references: false,
            legacy_fragment_recovery: true,
            max_manifest_depth: DEFAULT_MAX_MANIFEST_DEPTH,
            debug: false,
        }
    }

    /// Add an ID attribute name to register during processing.
    pub fn add_id_attr(&mut self, name: &str) {
        self.id_attrs.push(name.to_owned());
    }

    /// Map an external URI to a local file path.
    pub fn add_url_map(&mut self, url: &str, file_path: &str) {
        self.url_maps.push((url.to_owned(), file_path.to_owned()));
    }

    /// Append a resolver to the context's chain.
    pub fn add_resolver(&mut self, resolver: Arc<dyn ResourceResolver>) {
        self.resolvers.push(resolver);
    }
}

impl Default for VerifyContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VerifyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyContext")
            .field("digests", &self.digests)
            .field("transforms", &self.transforms)
            .field("resolvers", &self.resolvers.len())
            .field("id_attrs", &self.id_attrs)
            .field("url_maps", &self.url_maps)
            .field("base_dir", &self.base_dir)
            .field("base_uri", &self.base_uri)
            .field("secure_validation", &self.secure_validation)
            .field("cache_references", &self.cache_references)
            .field("legacy_fragment_recovery", &self.legacy_fragment_recovery)
            .field("max_manifest_depth", &self.max_manifest_depth)
            .finish()
    }
}
