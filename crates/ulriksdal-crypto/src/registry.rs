#![forbid(unsafe_code)]

//! Digest registry mapping algorithm URIs to factory functions.
//!
//! The registry is an ordinary value: build it once with
//! [`DigestRegistry::with_defaults`], register overrides where needed and
//! hand it to the verification context.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ulriksdal_core::Error;

use crate::digest::DigestAlgorithm;

/// Factory producing a fresh digest state.
pub type DigestFactory = Arc<dyn Fn() -> Box<dyn DigestAlgorithm> + Send + Sync>;

/// URI → digest factory table.
#[derive(Clone, Default)]
pub struct DigestRegistry {
    factories: BTreeMap<String, DigestFactory>,
}

impl DigestRegistry {
    /// A registry with no algorithms.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with every built-in digest.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for (uri, make) in crate::digest::builtin() {
            registry.register(uri, Arc::new(make));
        }
        registry
    }

    /// Register (or replace) the factory for `uri`.
    pub fn register(&mut self, uri: &str, factory: DigestFactory) {
        self.factories.insert(uri.to_owned(), factory);
    }

    /// Remove an algorithm.
    pub fn unregister(&mut self, uri: &str) -> bool {
        self.factories.remove(uri).is_some()
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.factories.contains_key(uri)
    }

    /// Look up a digest algorithm by URI.
    pub fn lookup(&self, uri: &str) -> Result<Box<dyn DigestAlgorithm>, Error> {
        self.factories
            .get(uri)
            .map(|make| make())
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("digest algorithm: {uri}")))
    }

    /// Compute a digest in one shot.
    pub fn digest(&self, uri: &str, data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut hasher = self.lookup(uri)?;
        hasher.update(data);
        Ok(hasher.finalize())
    }

    /// Registered URIs, sorted.
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for DigestRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestRegistry")
            .field("algorithms", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulriksdal_core::algorithm;

    struct Constant;

    impl DigestAlgorithm for Constant {
        fn update(&mut self, _data: &[u8]) {}
        fn finalize(self: Box<Self>) -> Vec<u8> {
            vec![7; 4]
        }
        fn uri(&self) -> &'static str {
            "urn:test:constant"
        }
    }

    #[test]
    fn test_defaults_match_builtin() {
        let registry = DigestRegistry::with_defaults();
        assert!(registry.contains(algorithm::SHA256));
        assert_eq!(
            registry.digest(algorithm::SHA256, b"hello").unwrap(),
            crate::digest::digest(algorithm::SHA256, b"hello").unwrap()
        );
    }

    #[test]
    fn test_override_and_unregister() {
        let mut registry = DigestRegistry::with_defaults();
        registry.register("urn:test:constant", Arc::new(|| Box::new(Constant) as Box<dyn DigestAlgorithm>));
        assert_eq!(registry.digest("urn:test:constant", b"x").unwrap(), vec![7; 4]);
        assert!(registry.unregister(algorithm::SHA1));
        assert!(matches!(
            registry.lookup(algorithm::SHA1),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }
}
