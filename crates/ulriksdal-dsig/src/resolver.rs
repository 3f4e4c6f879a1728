#![forbid(unsafe_code)]

//! Resource resolution for `<Reference>` URIs.
//!
//! Resolvers are tried in order: the manifest's own resolvers, the
//! context's resolvers, the url-map and local-file resolvers configured on
//! the context, then the same-document resolver.  The first success wins;
//! a failing resolver falls through to the next and the last failure is
//! reported.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use ulriksdal_core::Error;
use ulriksdal_transforms::DualFormInput;
use ulriksdal_xml::nodeset::node_index;
use ulriksdal_xml::xpath::SameDocumentRef;
use ulriksdal_xml::XmlDocument;

use crate::context::VerifyContext;

static NO_PROPERTIES: BTreeMap<String, String> = BTreeMap::new();

/// Everything a resolver may look at when dereferencing a URI.
#[derive(Debug, Clone, Copy)]
pub struct ResolverRequest<'a> {
    /// The `URI` attribute; `None` when absent.
    pub uri: Option<&'a str>,
    pub base_uri: Option<&'a str>,
    /// The document containing the reference.
    pub doc: &'a Arc<XmlDocument>,
    pub secure_validation: bool,
    /// Properties set on the manifest being verified.
    pub properties: &'a BTreeMap<String, String>,
}

impl ResolverRequest<'_> {
    /// The URI, treating an absent attribute as the empty URI.
    pub fn uri_or_empty(&self) -> &str {
        self.uri.unwrap_or("")
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Dereferences reference URIs into transform input.
pub trait ResourceResolver: Send + Sync {
    fn can_resolve(&self, request: &ResolverRequest<'_>) -> bool;

    fn resolve(&self, request: &ResolverRequest<'_>) -> Result<DualFormInput, Error>;
}

/// Resolvers and properties attached to the manifest being verified.
#[derive(Clone, Copy)]
pub struct ResolverScope<'a> {
    pub resolvers: &'a [Arc<dyn ResourceResolver>],
    pub properties: &'a BTreeMap<String, String>,
}

impl<'a> ResolverScope<'a> {
    pub fn new(
        resolvers: &'a [Arc<dyn ResourceResolver>],
        properties: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            resolvers,
            properties,
        }
    }

    /// A scope with no manifest resolvers or properties.
    pub fn empty() -> ResolverScope<'static> {
        ResolverScope {
            resolvers: &[],
            properties: &NO_PROPERTIES,
        }
    }
}

/// Run the resolver chain for one reference.
///
/// `secure_validation` is the policy of the reference being resolved.
pub fn resolve(
    ctx: &VerifyContext,
    scope: &ResolverScope<'_>,
    uri: Option<&str>,
    base_uri: Option<&str>,
    doc: &Arc<XmlDocument>,
    secure_validation: bool,
) -> Result<DualFormInput, Error> {
    let request = ResolverRequest {
        uri,
        base_uri: base_uri.or(ctx.base_uri.as_deref()),
        doc,
        secure_validation,
        properties: scope.properties,
    };

    let url_map = UrlMapResolver::new(ctx.url_maps.clone());
    let local_file = ctx.base_dir.as_ref().map(LocalFileResolver::new);
    let mut chain: Vec<&dyn ResourceResolver> = Vec::new();
    for resolver in scope.resolvers.iter().chain(ctx.resolvers.iter()) {
        chain.push(resolver.as_ref());
    }
    chain.push(&url_map);
    if let Some(resolver) = &local_file {
        chain.push(resolver);
    }
    chain.push(&SameDocumentResolver);

    let mut last_error = None;
    for resolver in chain {
        if !resolver.can_resolve(&request) {
            continue;
        }
        match resolver.resolve(&request) {
            Ok(input) => {
                tracing::trace!(uri = request.uri_or_empty(), "resolved reference URI");
                return Ok(input);
            }
            Err(err) => {
                tracing::trace!(uri = request.uri_or_empty(), error = %err, "resolver failed, trying next");
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Resolution {
        uri: request.uri_or_empty().to_owned(),
        reason: "no resolver can handle this URI".into(),
    }))
}

// ── Same document ────────────────────────────────────────────────────

/// `""`, `#id`, `#xpointer(/)` and `#xpointer(id('id'))` within the
/// reference's own document.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameDocumentResolver;

impl ResourceResolver for SameDocumentResolver {
    fn can_resolve(&self, request: &ResolverRequest<'_>) -> bool {
        SameDocumentRef::parse(request.uri_or_empty()).is_some()
    }

    fn resolve(&self, request: &ResolverRequest<'_>) -> Result<DualFormInput, Error> {
        let uri = request.uri_or_empty();
        let target = SameDocumentRef::parse(uri)
            .ok_or_else(|| Error::InvalidUri(format!("not a same-document reference: {uri}")))?;
        let doc = request.doc;
        let root = match target {
            SameDocumentRef::Document { .. } => 0,
            SameDocumentRef::Id { id, .. } => {
                let parsed = doc.parse_doc()?;
                let node = doc
                    .resolve_id(&parsed, id, request.secure_validation)
                    .map_err(|e| match e {
                        Error::SecureValidation(_) => e,
                        other => Error::Resolution {
                            uri: uri.to_owned(),
                            reason: other.to_string(),
                        },
                    })?;
                node_index(node)
            }
        };
        let mut input = DualFormInput::from_subtree(Arc::clone(doc), root, target.with_comments());
        if let Some(base) = request.base_uri {
            input.set_source_uri(Some(base.to_owned()));
        }
        Ok(input)
    }
}

// ── URL map ──────────────────────────────────────────────────────────

/// Maps URL prefixes to local files.
#[derive(Debug, Clone, Default)]
pub struct UrlMapResolver {
    maps: Vec<(String, String)>,
}

impl UrlMapResolver {
    pub fn new(maps: Vec<(String, String)>) -> Self {
        Self { maps }
    }

    fn lookup(&self, uri: &str) -> Option<&str> {
        self.maps
            .iter()
            .find(|(url, _)| uri == url.as_str() || uri.starts_with(url.as_str()))
            .map(|(_, path)| path.as_str())
    }
}

impl ResourceResolver for UrlMapResolver {
    fn can_resolve(&self, request: &ResolverRequest<'_>) -> bool {
        request.uri.is_some_and(|uri| self.lookup(uri).is_some())
    }

    fn resolve(&self, request: &ResolverRequest<'_>) -> Result<DualFormInput, Error> {
        let uri = request.uri_or_empty();
        let path = self.lookup(uri).ok_or_else(|| Error::Resolution {
            uri: uri.to_owned(),
            reason: "no url-map entry".into(),
        })?;
        let data = std::fs::read(path).map_err(|e| Error::Resolution {
            uri: uri.to_owned(),
            reason: format!("url-map {path}: {e}"),
        })?;
        Ok(DualFormInput::from_bytes(data).with_source_uri(uri))
    }
}

// ── Local files ──────────────────────────────────────────────────────

/// `file:` URIs and relative paths below a base directory.
#[derive(Debug, Clone)]
pub struct LocalFileResolver {
    base_dir: PathBuf,
}

impl LocalFileResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_part(uri: &str) -> &str {
        let without_scheme = uri
            .strip_prefix("file://")
            .or_else(|| uri.strip_prefix("file:"))
            .unwrap_or(uri);
        without_scheme.split('#').next().unwrap_or(without_scheme)
    }

    /// Whether `relative` stays inside the base directory.
    fn stays_inside(relative: &Path) -> bool {
        let mut depth: usize = 0;
        for component in relative.components() {
            match component {
                Component::Normal(_) => depth += 1,
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return false;
                    }
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => return false,
            }
        }
        true
    }
}

impl ResourceResolver for LocalFileResolver {
    fn can_resolve(&self, request: &ResolverRequest<'_>) -> bool {
        let Some(uri) = request.uri else {
            return false;
        };
        if uri.is_empty() || uri.starts_with('#') {
            return false;
        }
        uri.starts_with("file:") || !uri.contains("://")
    }

    fn resolve(&self, request: &ResolverRequest<'_>) -> Result<DualFormInput, Error> {
        let uri = request.uri_or_empty();
        let raw = Path::new(Self::path_part(uri));
        let path = if raw.is_absolute() {
            let inside = raw
                .strip_prefix(&self.base_dir)
                .is_ok_and(Self::stays_inside);
            if request.secure_validation && !inside {
                return Err(Error::Resolution {
                    uri: uri.to_owned(),
                    reason: "absolute path outside the base directory".into(),
                });
            }
            raw.to_path_buf()
        } else {
            if request.secure_validation && !Self::stays_inside(raw) {
                return Err(Error::Resolution {
                    uri: uri.to_owned(),
                    reason: "path escapes the base directory".into(),
                });
            }
            self.base_dir.join(raw)
        };
        let data = std::fs::read(&path).map_err(|e| Error::Resolution {
            uri: uri.to_owned(),
            reason: format!("{}: {e}", path.display()),
        })?;
        Ok(DualFormInput::from_bytes(data).with_source_uri(uri))
    }
}

// ── In memory ────────────────────────────────────────────────────────

/// Serves detached content registered ahead of verification.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uri: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.entries.insert(uri.into(), data.into());
    }

    pub fn with_entry(mut self, uri: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(uri, data);
        self
    }
}

impl ResourceResolver for MemoryResolver {
    fn can_resolve(&self, request: &ResolverRequest<'_>) -> bool {
        request.uri.is_some_and(|uri| self.entries.contains_key(uri))
    }

    fn resolve(&self, request: &ResolverRequest<'_>) -> Result<DualFormInput, Error> {
        let uri = request.uri_or_empty();
        let data = self.entries.get(uri).ok_or_else(|| Error::Resolution {
            uri: uri.to_owned(),
            reason: "not registered".into(),
        })?;
        Ok(DualFormInput::from_bytes(data.clone()).with_source_uri(uri))
    }
}
