#![forbid(unsafe_code)]

//! Transform registry mapping algorithm URIs to transform factories.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ulriksdal_c14n::C14nMode;
use ulriksdal_core::{algorithm, Error};

use crate::base64_transform::Base64DecodeTransform;
use crate::enveloped::{EnvelopedSignatureTransform, XPathEnvelopedTransform};
use crate::pipeline::{C14nTransform, Transform};
use crate::step::TransformStep;

/// Factory building a transform from its declared step.
pub type TransformFactory =
    Arc<dyn Fn(&TransformStep) -> Result<Box<dyn Transform>, Error> + Send + Sync>;

/// URI → transform factory table.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    factories: BTreeMap<String, TransformFactory>,
}

impl TransformRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Canonicalization in every supported mode, base64 decode,
    /// enveloped-signature and the enveloped XPath filter.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for mode in C14nMode::ALL {
            registry.register(
                mode.uri(),
                Arc::new(move |step: &TransformStep| -> Result<Box<dyn Transform>, Error> {
                    Ok(Box::new(C14nTransform::new(mode, step.inclusive_prefixes().to_vec())))
                }),
            );
        }
        registry.register(
            algorithm::BASE64,
            Arc::new(|_: &TransformStep| -> Result<Box<dyn Transform>, Error> {
                Ok(Box::new(Base64DecodeTransform))
            }),
        );
        registry.register(
            algorithm::ENVELOPED_SIGNATURE,
            Arc::new(|_: &TransformStep| -> Result<Box<dyn Transform>, Error> {
                Ok(Box::new(EnvelopedSignatureTransform))
            }),
        );
        registry.register(
            algorithm::XPATH,
            Arc::new(|step: &TransformStep| -> Result<Box<dyn Transform>, Error> {
                Ok(Box::new(XPathEnvelopedTransform::from_step(step)?))
            }),
        );
        registry
    }

    /// Register (or replace) the factory for `uri`.
    pub fn register(&mut self, uri: &str, factory: TransformFactory) {
        self.factories.insert(uri.to_owned(), factory);
    }

    pub fn unregister(&mut self, uri: &str) -> bool {
        self.factories.remove(uri).is_some()
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.factories.contains_key(uri)
    }

    /// Build the transform for a declared step.
    pub fn instantiate(&self, step: &TransformStep) -> Result<Box<dyn Transform>, Error> {
        let make = self.factories.get(step.algorithm()).ok_or_else(|| {
            Error::UnsupportedAlgorithm(format!("transform algorithm: {}", step.algorithm()))
        })?;
        make(step)
    }

    /// Registered URIs, sorted.
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("algorithms", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
