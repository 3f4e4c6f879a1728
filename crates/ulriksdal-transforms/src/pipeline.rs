#![forbid(unsafe_code)]

//! Transform pipeline and trait definitions.

use std::sync::Arc;

use ulriksdal_c14n::C14nMode;
use ulriksdal_core::{algorithm, Error};
use ulriksdal_xml::XmlDocument;

use crate::input::DualFormInput;
use crate::registry::TransformRegistry;
use crate::step::Transforms;

/// Maximum number of transforms per reference under secure validation.
pub const MAXIMUM_TRANSFORM_COUNT: usize = 5;

/// The `<ds:Signature>` element enclosing the reference being processed.
#[derive(Debug, Clone)]
pub struct SignatureLocation {
    pub doc: Arc<XmlDocument>,
    pub node: usize,
}

/// Ambient state handed to every transform.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    pub signature: Option<SignatureLocation>,
    pub secure_validation: bool,
}

/// Trait for individual transforms.
pub trait Transform: Send + Sync {
    /// The algorithm URI for this transform.
    fn uri(&self) -> &str;

    /// Execute the transform, consuming its input.
    fn execute(&self, input: DualFormInput, ctx: &TransformContext) -> Result<DualFormInput, Error>;

    /// Whether this step canonicalizes.
    fn is_canonicalization(&self) -> bool {
        false
    }
}

/// Reject transform chains that secure validation does not allow.
pub fn enforce_secure_validation(transforms: &Transforms) -> Result<(), Error> {
    if transforms.len() > MAXIMUM_TRANSFORM_COUNT {
        return Err(Error::TooManyTransforms {
            count: transforms.len(),
            max: MAXIMUM_TRANSFORM_COUNT,
        });
    }
    if let Some(step) = transforms.iter().find(|s| s.algorithm() == algorithm::XSLT) {
        return Err(Error::SecureValidation(format!(
            "transform {} is not allowed",
            step.algorithm()
        )));
    }
    Ok(())
}

/// A pipeline of transforms executed in sequence.
#[derive(Default)]
pub struct TransformPipeline {
    transforms: Vec<Box<dyn Transform>>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate every declared step through `registry`.
    pub fn from_transforms(
        transforms: &Transforms,
        registry: &TransformRegistry,
    ) -> Result<Self, Error> {
        let transforms = transforms
            .iter()
            .map(|step| registry.instantiate(step))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { transforms })
    }

    pub fn push(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    /// Execute all transforms in order.
    pub fn apply(&self, input: DualFormInput, ctx: &TransformContext) -> Result<DualFormInput, Error> {
        self.run(&self.transforms, input, ctx)
    }

    /// Execute the transforms that precede the first canonicalization step.
    pub fn apply_before_canonicalization(
        &self,
        input: DualFormInput,
        ctx: &TransformContext,
    ) -> Result<DualFormInput, Error> {
        let end = self
            .transforms
            .iter()
            .position(|t| t.is_canonicalization())
            .unwrap_or(self.transforms.len());
        self.run(&self.transforms[..end], input, ctx)
    }

    fn run(
        &self,
        steps: &[Box<dyn Transform>],
        input: DualFormInput,
        ctx: &TransformContext,
    ) -> Result<DualFormInput, Error> {
        let mut data = input;
        for transform in steps {
            tracing::trace!(transform = transform.uri(), "applying transform");
            data = transform.execute(data, ctx)?;
        }
        Ok(data)
    }

    pub fn uris(&self) -> Vec<&str> {
        self.transforms.iter().map(|t| t.uri()).collect()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

// ── C14N Transform ───────────────────────────────────────────────────

/// A canonicalization transform.
pub struct C14nTransform {
    mode: C14nMode,
    inclusive_prefixes: Vec<String>,
}

impl C14nTransform {
    pub fn new(mode: C14nMode, inclusive_prefixes: Vec<String>) -> Self {
        Self {
            mode,
            inclusive_prefixes,
        }
    }
}

impl Transform for C14nTransform {
    fn uri(&self) -> &str {
        self.mode.uri()
    }

    fn execute(&self, mut input: DualFormInput, _ctx: &TransformContext) -> Result<DualFormInput, Error> {
        // Byte input is parsed before canonicalizing.
        let bytes = input.canonicalize(self.mode, &self.inclusive_prefixes)?;
        Ok(input.replace_bytes(bytes))
    }

    fn is_canonicalization(&self) -> bool {
        true
    }
}
