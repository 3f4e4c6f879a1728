#![forbid(unsafe_code)]

//! Enveloped signature transform.
//!
//! Removes the enclosing `<Signature>` element from the node set.  The
//! XPath transform is accepted only for the equivalent
//! `not(ancestor-or-self::P:Signature)` filter.

use std::sync::Arc;

use ulriksdal_core::{algorithm, ns, Error};
use ulriksdal_xml::SubtreeExclusionFilter;

use crate::input::DualFormInput;
use crate::pipeline::{SignatureLocation, Transform, TransformContext};
use crate::step::{TransformParams, TransformStep};

/// Install a filter dropping the signature subtree from `input`.
fn exclude_signature(mut input: DualFormInput, ctx: &TransformContext) -> Result<DualFormInput, Error> {
    let Some(SignatureLocation { doc, node }) = &ctx.signature else {
        return Err(Error::Transform(
            "enveloped-signature transform used outside a Signature".into(),
        ));
    };
    input.as_node_set(false)?;
    let same_document = input
        .document()
        .is_some_and(|d| Arc::ptr_eq(d, doc) || d.text() == doc.text());
    if !same_document {
        return Err(Error::Transform(
            "enveloped-signature transform applied to content of another document".into(),
        ));
    }
    input.add_node_filter(Arc::new(SubtreeExclusionFilter::new(*node)))?;
    Ok(input)
}

/// The enveloped signature transform.
pub struct EnvelopedSignatureTransform;

impl Transform for EnvelopedSignatureTransform {
    fn uri(&self) -> &str {
        algorithm::ENVELOPED_SIGNATURE
    }

    fn execute(&self, input: DualFormInput, ctx: &TransformContext) -> Result<DualFormInput, Error> {
        exclude_signature(input, ctx)
    }
}

/// XPath filtering, restricted to the enveloped-signature expression.
pub struct XPathEnvelopedTransform;

impl XPathEnvelopedTransform {
    /// Accept `step` only if its expression is the enveloped filter with the
    /// prefix bound to the DSig namespace.
    pub fn from_step(step: &TransformStep) -> Result<Self, Error> {
        let TransformParams::XPath {
            expression,
            namespaces,
        } = step.params()
        else {
            return Err(Error::Transform("XPath transform without an expression".into()));
        };
        let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
        let prefix = compact
            .strip_prefix("not(ancestor-or-self::")
            .and_then(|rest| rest.strip_suffix(":Signature)"));
        let bound_to_dsig = prefix.is_some_and(|p| {
            namespaces
                .iter()
                .any(|(name, uri)| name == p && uri == ns::DSIG)
        });
        if bound_to_dsig {
            Ok(Self)
        } else {
            Err(Error::UnsupportedAlgorithm(format!(
                "XPath expression not supported: {expression}"
            )))
        }
    }
}

impl Transform for XPathEnvelopedTransform {
    fn uri(&self) -> &str {
        algorithm::XPATH
    }

    fn execute(&self, input: DualFormInput, ctx: &TransformContext) -> Result<DualFormInput, Error> {
        exclude_signature(input, ctx)
    }
}
