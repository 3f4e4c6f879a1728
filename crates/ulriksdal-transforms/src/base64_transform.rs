#![forbid(unsafe_code)]

//! Base64 decode transform.

use base64::Engine;
use ulriksdal_core::{algorithm, Error};

use crate::input::DualFormInput;
use crate::pipeline::{Transform, TransformContext};

/// Base64 decode transform.
///
/// Node-form input contributes the text nodes of its node set, in document
/// order; whitespace is ignored.
pub struct Base64DecodeTransform;

impl Transform for Base64DecodeTransform {
    fn uri(&self) -> &str {
        algorithm::BASE64
    }

    fn execute(&self, mut input: DualFormInput, _ctx: &TransformContext) -> Result<DualFormInput, Error> {
        let text = if input.is_node_form() {
            let nodes = input.as_node_set(true)?;
            let parsed = nodes.doc.parse_doc()?;
            nodes
                .nodes
                .in_document_order(&parsed)
                .into_iter()
                .filter(|n| n.is_text())
                .filter_map(|n| n.text())
                .collect::<String>()
        } else {
            std::str::from_utf8(input.as_bytes()?)
                .map_err(|e| Error::Transform(format!("base64 input not UTF-8: {e}")))?
                .to_owned()
        };

        let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&cleaned)
            .map_err(|e| Error::Base64(format!("decode error: {e}")))?;

        Ok(input.replace_bytes(decoded))
    }
}
