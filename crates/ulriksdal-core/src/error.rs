#![forbid(unsafe_code)]

use std::fmt;

/// Identifies the `<Reference>` a failure belongs to.
///
/// Carried by [`Error::MissingResource`] and
/// [`Error::ReferenceNotInitialized`] so callers can tell which reference
/// could not be processed and retry it with another resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailedReference {
    pub uri: Option<String>,
    pub id: Option<String>,
    pub type_uri: Option<String>,
    pub digest_algorithm: String,
}

impl fmt::Display for FailedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.uri {
            Some(uri) => write!(f, "URI=\"{uri}\"")?,
            None => write!(f, "URI absent")?,
        }
        if let Some(id) = &self.id {
            write!(f, " Id=\"{id}\"")?;
        }
        Ok(())
    }
}

/// Errors produced by the Ulriksdal XML-DSig engine.
///
/// A digest mismatch is not an error; it is reported as a `false`
/// verification result.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("invalid XML structure: {0}")]
    XmlStructure(String),

    #[error("missing required element: {0}")]
    MissingElement(String),

    #[error("missing required attribute: {0}")]
    MissingAttribute(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("transform error: {0}")]
    Transform(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid URI reference: {0}")]
    InvalidUri(String),

    #[error("cannot resolve URI {uri:?}: {reason}")]
    Resolution { uri: String, reason: String },

    #[error("reference not initialized ({reference}): {source}")]
    ReferenceNotInitialized {
        reference: Box<FailedReference>,
        #[source]
        source: Box<Error>,
    },

    #[error("missing resource for reference {reference}: {reason}")]
    MissingResource {
        reference: Box<FailedReference>,
        reason: String,
        #[source]
        source: Option<Box<Error>>,
    },

    #[error("manifest contains no references")]
    EmptyManifest,

    #[error("{count} references exceed the secure validation maximum of {max}")]
    TooManyReferences { count: usize, max: usize },

    #[error("{count} transforms exceed the secure validation maximum of {max}")]
    TooManyTransforms { count: usize, max: usize },

    #[error("nested manifests exceed the maximum depth of {max}")]
    TooDeep { max: usize },

    #[error("reference index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("rejected by secure validation: {0}")]
    SecureValidation(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a caller may retry after supplying a different resolver.
    pub fn is_missing_resource(&self) -> bool {
        matches!(self, Error::MissingResource { .. })
    }

    /// The reference this error is attached to, if any.
    pub fn failed_reference(&self) -> Option<&FailedReference> {
        match self {
            Error::MissingResource { reference, .. }
            | Error::ReferenceNotInitialized { reference, .. } => Some(reference),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_reference_display() {
        let r = FailedReference {
            uri: Some("#obj".into()),
            id: Some("ref-1".into()),
            ..Default::default()
        };
        assert_eq!(r.to_string(), "URI=\"#obj\" Id=\"ref-1\"");
        assert_eq!(FailedReference::default().to_string(), "URI absent");
    }

    #[test]
    fn test_missing_resource_accessors() {
        let err = Error::MissingResource {
            reference: Box::new(FailedReference {
                uri: Some("http://example.com/a".into()),
                ..Default::default()
            }),
            reason: "no resolver".into(),
            source: None,
        };
        assert!(err.is_missing_resource());
        assert_eq!(
            err.failed_reference().and_then(|r| r.uri.as_deref()),
            Some("http://example.com/a")
        );
        assert!(!Error::EmptyManifest.is_missing_resource());
    }
}
