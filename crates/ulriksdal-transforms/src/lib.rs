#![forbid(unsafe_code)]

//! Transform engine for the Ulriksdal XML-DSig engine.
//!
//! A reference's declared [`Transforms`] are instantiated through a
//! [`TransformRegistry`] into a [`TransformPipeline`], which moves a
//! [`DualFormInput`] through each step in order.

pub mod base64_transform;
pub mod enveloped;
pub mod input;
pub mod pipeline;
pub mod registry;
pub mod step;

pub use input::{DualFormInput, InputForm};
pub use pipeline::{
    enforce_secure_validation, C14nTransform, SignatureLocation, Transform, TransformContext,
    TransformPipeline, MAXIMUM_TRANSFORM_COUNT,
};
pub use registry::{TransformFactory, TransformRegistry};
pub use step::{TransformParams, TransformStep, Transforms};
