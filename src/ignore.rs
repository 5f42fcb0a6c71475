//! Ignore rules: nodes excluded from content comparison.
//!
//! Three rule kinds are recognised from the configured strings:
//! - a bare tag name (`AreaCode`) ignores every element with that local name,
//! - a dotted chain (`Numbers.NumberItem.AreaCode`) ignores nodes whose ancestor
//!   chain ends with those names; the last name may address an attribute,
//! - a path query (`//NumberItem[2]/AreaCode`) ignores every node it selects.

use std::collections::HashSet;

use tracing::debug;

use crate::document::{NodeId, XmlDocument, XmlNode};
use crate::error::Result;
use crate::expression::{chain_matches, is_path_query};
use crate::namespace::NamespaceContext;
use crate::xpath::{CompiledXPath, XPathValue};

#[derive(Debug, Clone, PartialEq)]
pub enum IgnoreRule {
    TagName(String),
    DotPath(Vec<String>),
    PathQuery(CompiledXPath),
}

impl IgnoreRule {
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        if is_path_query(expression) {
            return Ok(IgnoreRule::PathQuery(CompiledXPath::compile(expression)?));
        }

        let segments: Vec<String> = expression
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Ok(match segments.len() {
            1 => IgnoreRule::TagName(segments.into_iter().next().unwrap_or_default()),
            _ => IgnoreRule::DotPath(segments),
        })
    }

    /// Name-based rules only; path queries are matched through [`DocumentIgnoreRules`].
    fn matches_name(&self, node: &XmlNode<'_>) -> bool {
        match self {
            IgnoreRule::TagName(name) => {
                node.is_element() && node.local_name() == Some(name.as_str())
            }
            IgnoreRule::DotPath(segments) => match segments.split_last() {
                Some((last, parents)) => {
                    (node.is_element() || node.is_attribute())
                        && node.local_name() == Some(last.as_str())
                        && chain_matches(node, parents)
                }
                None => false,
            },
            IgnoreRule::PathQuery(_) => false,
        }
    }
}

/// The set of ignore rules of one validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IgnoreRules {
    rules: Vec<IgnoreRule>,
}

impl IgnoreRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse<I, S>(expressions: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = expressions
            .into_iter()
            .filter(|e| !e.as_ref().trim().is_empty())
            .map(|e| IgnoreRule::parse(e.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn push(&mut self, rule: IgnoreRule) {
        self.rules.push(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    /// Evaluates the path-query rules against `document` once, for checking
    /// many of its nodes.
    pub fn for_document<'r, 'd>(
        &'r self,
        document: &'d XmlDocument,
        namespaces: &NamespaceContext,
    ) -> Result<DocumentIgnoreRules<'r, 'd>> {
        let mut selected = HashSet::new();
        for rule in &self.rules {
            if let IgnoreRule::PathQuery(xpath) = rule
                && let XPathValue::NodeSet(nodes) = xpath.evaluate(document.root(), namespaces)?
            {
                selected.extend(nodes.iter().map(|node| node.id()));
            }
        }
        Ok(DocumentIgnoreRules {
            rules: self,
            document,
            selected,
        })
    }

    /// True if any rule covers `node` (an element or an attribute of the received document).
    pub fn is_ignored(&self, node: &XmlNode<'_>, namespaces: &NamespaceContext) -> Result<bool> {
        Ok(self
            .for_document(node.document(), namespaces)?
            .is_ignored(node))
    }
}

/// Ignore rules bound to one received document.
#[derive(Debug)]
pub struct DocumentIgnoreRules<'r, 'd> {
    rules: &'r IgnoreRules,
    document: &'d XmlDocument,
    selected: HashSet<NodeId>,
}

impl DocumentIgnoreRules<'_, '_> {
    pub fn is_ignored(&self, node: &XmlNode<'_>) -> bool {
        let by_query =
            std::ptr::eq(node.document(), self.document) && self.selected.contains(&node.id());
        let ignored = by_query || self.rules.rules.iter().any(|rule| rule.matches_name(node));
        if ignored {
            debug!(node = %node.path_name(), "Node is ignored");
        }
        ignored
    }
}
