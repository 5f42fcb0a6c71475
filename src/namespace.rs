use std::collections::BTreeMap;

use tracing::debug;

use crate::document::XmlDocument;

/// Prefix to namespace URI bindings used when evaluating path queries.
/// The empty prefix stands for the default namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceContext {
    bindings: BTreeMap<String, String>,
}

impl NamespaceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.bindings.insert(prefix.into(), uri.into());
    }

    pub fn bind_all<'a>(&mut self, bindings: impl IntoIterator<Item = (&'a String, &'a String)>) {
        for (prefix, uri) in bindings {
            self.bind(prefix.clone(), uri.clone());
        }
    }

    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.bindings.get(prefix).map(String::as_str)
    }

    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(_, u)| u.as_str() == uri)
            .map(|(p, _)| p.as_str())
    }

    pub fn bindings(&self) -> &BTreeMap<String, String> {
        &self.bindings
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Builds the namespace context for one received document.
///
/// Globally configured mappings are bound first. Without explicit bindings every
/// declaration found in the document is bound; with explicit bindings only the
/// document declarations whose URI is not explicitly mapped are kept, and the
/// explicit bindings are applied last so they always win.
#[derive(Debug, Clone, Default)]
pub struct NamespaceContextBuilder {
    default_mappings: BTreeMap<String, String>,
}

impl NamespaceContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_mappings(mappings: BTreeMap<String, String>) -> Self {
        Self {
            default_mappings: mappings,
        }
    }

    pub fn default_mappings(&self) -> &BTreeMap<String, String> {
        &self.default_mappings
    }

    pub fn build_context(
        &self,
        document: &XmlDocument,
        explicit: &BTreeMap<String, String>,
    ) -> NamespaceContext {
        let mut context = NamespaceContext::new();
        context.bind_all(&self.default_mappings);

        let dynamic = document_namespaces(document);
        if explicit.is_empty() {
            context.bind_all(&dynamic);
        } else {
            for (prefix, uri) in &dynamic {
                if !explicit.values().any(|v| v == uri) {
                    context.bind(prefix.clone(), uri.clone());
                }
            }
            context.bind_all(explicit);
        }

        debug!(bindings = ?context.bindings(), "Built namespace context");
        context
    }
}

/// All namespace declarations of a document; later declarations of a prefix win.
pub fn document_namespaces(document: &XmlDocument) -> BTreeMap<String, String> {
    document
        .elements()
        .flat_map(|e| e.namespace_declarations().iter())
        .map(|decl| (decl.prefix.clone().unwrap_or_default(), decl.uri.clone()))
        .collect()
}

/// Namespace declarations on the root element only.
pub fn root_namespaces(document: &XmlDocument) -> BTreeMap<String, String> {
    document
        .root_element()
        .map(|root| {
            root.namespace_declarations()
                .iter()
                .map(|decl| (decl.prefix.clone().unwrap_or_default(), decl.uri.clone()))
                .collect()
        })
        .unwrap_or_default()
}
