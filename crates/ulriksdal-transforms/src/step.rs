#![forbid(unsafe_code)]

//! Declared transform steps, as read from and written to `<ds:Transforms>`.

use ulriksdal_core::{ns, Error};
use ulriksdal_xml::document::{find_child_element, find_child_elements, is_element_named};
use ulriksdal_xml::writer::XmlWriter;
use ulriksdal_xml::XmlDocument;

/// Algorithm-specific parameters of a transform step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransformParams {
    #[default]
    None,
    /// `ec:InclusiveNamespaces/@PrefixList` of an exclusive C14N step.
    InclusiveNamespaces(Vec<String>),
    /// `ds:XPath` expression with its in-scope prefix bindings.
    XPath {
        expression: String,
        namespaces: Vec<(String, String)>,
    },
}

/// One declared transform: an algorithm URI and its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformStep {
    algorithm: String,
    params: TransformParams,
}

impl TransformStep {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            params: TransformParams::None,
        }
    }

    pub fn with_inclusive_namespaces(algorithm: impl Into<String>, prefixes: Vec<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            params: TransformParams::InclusiveNamespaces(prefixes),
        }
    }

    pub fn xpath(expression: impl Into<String>, namespaces: Vec<(String, String)>) -> Self {
        Self {
            algorithm: ulriksdal_core::algorithm::XPATH.to_owned(),
            params: TransformParams::XPath {
                expression: expression.into(),
                namespaces,
            },
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn params(&self) -> &TransformParams {
        &self.params
    }

    /// The InclusiveNamespaces prefix list, empty when there is none.
    pub fn inclusive_prefixes(&self) -> &[String] {
        match &self.params {
            TransformParams::InclusiveNamespaces(p) => p,
            _ => &[],
        }
    }

    /// Parse a `<ds:Transform>` element.
    pub fn from_element(node: roxmltree::Node<'_, '_>) -> Result<Self, Error> {
        if !is_element_named(node, ns::DSIG, ns::node::TRANSFORM) {
            return Err(Error::XmlStructure(format!(
                "expected <Transform>, found <{}>",
                node.tag_name().name()
            )));
        }
        let algorithm = node
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute("Transform/@Algorithm".into()))?
            .to_owned();

        let params = if let Some(inc) =
            find_child_element(node, ns::EXC_C14N, ns::node::INCLUSIVE_NAMESPACES)
        {
            let list = inc.attribute(ns::attr::PREFIX_LIST).unwrap_or("");
            TransformParams::InclusiveNamespaces(
                list.split_whitespace().map(str::to_owned).collect(),
            )
        } else if let Some(xp) = find_child_element(node, ns::DSIG, ns::node::XPATH) {
            let expression: String = xp
                .children()
                .filter(|c| c.is_text())
                .filter_map(|c| c.text())
                .collect();
            let mut namespaces: Vec<(String, String)> = xp
                .namespaces()
                .filter_map(|n| n.name().map(|p| (p.to_owned(), n.uri().to_owned())))
                .filter(|(p, _)| p != "xml")
                .collect();
            namespaces.sort();
            namespaces.dedup_by(|a, b| a.0 == b.0);
            TransformParams::XPath {
                expression: expression.trim().to_owned(),
                namespaces,
            }
        } else {
            TransformParams::None
        };

        Ok(Self { algorithm, params })
    }

    fn write(&self, w: &mut XmlWriter) {
        let name = format!("{}:{}", ns::DSIG_PREFIX, ns::node::TRANSFORM);
        match &self.params {
            TransformParams::None => {
                w.empty_element(&name, &[(ns::attr::ALGORITHM, self.algorithm.as_str())]);
            }
            TransformParams::InclusiveNamespaces(prefixes) => {
                w.start_element(&name, &[(ns::attr::ALGORITHM, self.algorithm.as_str())]);
                let list = prefixes.join(" ");
                let xmlns = format!("xmlns:{}", ns::EXC_C14N_PREFIX);
                w.empty_element(
                    &format!("{}:{}", ns::EXC_C14N_PREFIX, ns::node::INCLUSIVE_NAMESPACES),
                    &[(xmlns.as_str(), ns::EXC_C14N), (ns::attr::PREFIX_LIST, list.as_str())],
                );
                w.end_element();
            }
            TransformParams::XPath {
                expression,
                namespaces,
            } => {
                w.start_element(&name, &[(ns::attr::ALGORITHM, self.algorithm.as_str())]);
                let decls: Vec<(String, &str)> = namespaces
                    .iter()
                    .map(|(p, uri)| (format!("xmlns:{p}"), uri.as_str()))
                    .collect();
                let attrs: Vec<(&str, &str)> =
                    decls.iter().map(|(k, v)| (k.as_str(), *v)).collect();
                w.text_element(
                    &format!("{}:{}", ns::DSIG_PREFIX, ns::node::XPATH),
                    &attrs,
                    expression,
                );
                w.end_element();
            }
        }
    }
}

/// The ordered transform chain declared by a reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transforms {
    steps: Vec<TransformStep>,
}

impl Transforms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: TransformStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TransformStep> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Parse a `<ds:Transforms>` element.
    pub fn from_element(node: roxmltree::Node<'_, '_>) -> Result<Self, Error> {
        if !is_element_named(node, ns::DSIG, ns::node::TRANSFORMS) {
            return Err(Error::XmlStructure(format!(
                "expected <Transforms>, found <{}>",
                node.tag_name().name()
            )));
        }
        let steps = find_child_elements(node, ns::DSIG, ns::node::TRANSFORM)
            .into_iter()
            .map(TransformStep::from_element)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { steps })
    }

    /// Parse a standalone `<ds:Transforms>` document.
    pub fn parse(xml: &str) -> Result<Self, Error> {
        let doc = XmlDocument::parse(xml.to_owned())?;
        let parsed = doc.parse_doc()?;
        Self::from_element(parsed.root_element())
    }

    /// Write the `<ds:Transforms>` element; `declare_ns` adds the `ds`
    /// namespace declaration for standalone output.
    pub fn write(&self, w: &mut XmlWriter, declare_ns: bool) {
        let name = format!("{}:{}", ns::DSIG_PREFIX, ns::node::TRANSFORMS);
        let xmlns = format!("xmlns:{}", ns::DSIG_PREFIX);
        if declare_ns {
            w.start_element(&name, &[(xmlns.as_str(), ns::DSIG)]);
        } else {
            w.start_element(&name, &[]);
        }
        for step in &self.steps {
            step.write(w);
        }
        w.end_element();
    }

    /// Standalone `<ds:Transforms>` XML.
    pub fn to_xml(&self) -> String {
        let mut w = XmlWriter::new();
        self.write(&mut w, true);
        w.into_string()
    }
}

impl FromIterator<TransformStep> for Transforms {
    fn from_iter<I: IntoIterator<Item = TransformStep>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Transforms {
    type Item = &'a TransformStep;
    type IntoIter = std::slice::Iter<'a, TransformStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}
