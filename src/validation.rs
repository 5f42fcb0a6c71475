//! Validation settings handed to the validators for one call.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::TestContext;
use crate::error::Result;
use crate::expression::PathExpression;
use crate::ignore::IgnoreRules;

/// Settings of the structural tree comparison.
#[derive(Debug, Clone)]
pub struct XmlValidationContext {
    ignore: IgnoreRules,
    namespaces: BTreeMap<String, String>,
    control_namespaces: BTreeMap<String, String>,
    schema_validation: bool,
    schema: Option<String>,
    schema_repository: Option<String>,
}

impl Default for XmlValidationContext {
    fn default() -> Self {
        Self {
            ignore: IgnoreRules::new(),
            namespaces: BTreeMap::new(),
            control_namespaces: BTreeMap::new(),
            schema_validation: true,
            schema: None,
            schema_repository: None,
        }
    }
}

impl XmlValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds ignore expressions; malformed path queries fail here, not during validation.
    pub fn with_ignore_expressions<I, S>(mut self, expressions: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for rule in IgnoreRules::parse(expressions)?.rules() {
            self.ignore.push(rule.clone());
        }
        Ok(self)
    }

    /// Prefix binding used by path queries (ignore rules) against the received document.
    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.insert(prefix.into(), uri.into());
        self
    }

    /// Namespace declaration the received root element must carry.
    pub fn with_control_namespace(
        mut self,
        prefix: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        self.control_namespaces.insert(prefix.into(), uri.into());
        self
    }

    pub fn with_schema_validation(mut self, enabled: bool) -> Self {
        self.schema_validation = enabled;
        self
    }

    /// Validates against the named schema of the registry instead of a repository.
    pub fn with_schema(mut self, name: impl Into<String>) -> Self {
        self.schema = Some(name.into());
        self
    }

    pub fn with_schema_repository(mut self, name: impl Into<String>) -> Self {
        self.schema_repository = Some(name.into());
        self
    }

    pub fn ignore(&self) -> &IgnoreRules {
        &self.ignore
    }

    pub fn namespaces(&self) -> &BTreeMap<String, String> {
        &self.namespaces
    }

    pub fn control_namespaces(&self) -> &BTreeMap<String, String> {
        &self.control_namespaces
    }

    pub fn is_schema_validation_enabled(&self) -> bool {
        self.schema_validation
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn schema_repository(&self) -> Option<&str> {
        self.schema_repository.as_deref()
    }
}

/// An expression parsed up front, or kept as text when it contains
/// `${...}` placeholders that can only be resolved per call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionEntry {
    Parsed(PathExpression),
    Deferred(String),
}

impl ExpressionEntry {
    pub fn new(raw: &str) -> Result<Self> {
        if raw.contains("${") {
            Ok(ExpressionEntry::Deferred(raw.to_string()))
        } else {
            Ok(ExpressionEntry::Parsed(PathExpression::parse(raw)?))
        }
    }

    pub fn resolve(&self, context: &TestContext) -> Result<Cow<'_, PathExpression>> {
        match self {
            ExpressionEntry::Parsed(expression) => Ok(Cow::Borrowed(expression)),
            ExpressionEntry::Deferred(raw) => Ok(Cow::Owned(PathExpression::parse(
                &context.replace_dynamic_content(raw)?,
            )?)),
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            ExpressionEntry::Parsed(expression) => expression.text(),
            ExpressionEntry::Deferred(raw) => raw,
        }
    }
}

/// Expected outcome of one path expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExpectedValue {
    /// Exact text, a matcher expression, or a list literal when compared with a node-set
    Text(String),
    List(Vec<String>),
    HasSize(usize),
    ContainsAll(Vec<String>),
    ContainsInOrder(Vec<String>),
    GreaterThan(f64),
    LessThan(f64),
}

impl ExpectedValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ExpectedValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for ExpectedValue {
    fn from(text: &str) -> Self {
        ExpectedValue::Text(text.to_string())
    }
}

impl From<String> for ExpectedValue {
    fn from(text: String) -> Self {
        ExpectedValue::Text(text)
    }
}

impl From<Vec<String>> for ExpectedValue {
    fn from(values: Vec<String>) -> Self {
        ExpectedValue::List(values)
    }
}

impl fmt::Display for ExpectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedValue::Text(text) => f.write_str(text),
            ExpectedValue::List(values) => write!(f, "[{}]", values.join(", ")),
            ExpectedValue::HasSize(size) => write!(f, "a collection with size <{}>", size),
            ExpectedValue::ContainsAll(values) => {
                write!(f, "a collection containing [{}]", values.join(", "))
            }
            ExpectedValue::ContainsInOrder(values) => {
                write!(f, "a collection containing in order [{}]", values.join(", "))
            }
            ExpectedValue::GreaterThan(n) => write!(f, "a value greater than <{}>", n),
            ExpectedValue::LessThan(n) => write!(f, "a value less than <{}>", n),
        }
    }
}

/// Ordered path expressions with expected values, plus ignore rules and namespaces.
#[derive(Debug, Clone, Default)]
pub struct XpathValidationContext {
    expressions: Vec<(ExpressionEntry, ExpectedValue)>,
    ignore: IgnoreRules,
    namespaces: BTreeMap<String, String>,
}

impl XpathValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expression(
        mut self,
        expression: &str,
        expected: impl Into<ExpectedValue>,
    ) -> Result<Self> {
        self.expressions
            .push((ExpressionEntry::new(expression)?, expected.into()));
        Ok(self)
    }

    pub fn with_ignore_expressions<I, S>(mut self, expressions: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for rule in IgnoreRules::parse(expressions)?.rules() {
            self.ignore.push(rule.clone());
        }
        Ok(self)
    }

    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.insert(prefix.into(), uri.into());
        self
    }

    pub fn expressions(&self) -> &[(ExpressionEntry, ExpectedValue)] {
        &self.expressions
    }

    pub fn ignore(&self) -> &IgnoreRules {
        &self.ignore
    }

    pub fn namespaces(&self) -> &BTreeMap<String, String> {
        &self.namespaces
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_entries() {
        let parsed = ExpressionEntry::new("//element/sub-element").unwrap();
        assert!(matches!(parsed, ExpressionEntry::Parsed(_)));

        let deferred = ExpressionEntry::new("//element/${name}").unwrap();
        assert_eq!(deferred.raw(), "//element/${name}");

        let mut context = TestContext::new();
        context.set_variable("name", "sub-element");
        let resolved = deferred.resolve(&context).unwrap();
        assert_eq!(resolved.text(), "//element/sub-element");

        assert!(ExpressionEntry::new("//a[").is_err());
    }

    #[test]
    fn test_expressions_keep_order() {
        let context = XpathValidationContext::new()
            .with_expression("//b", "2")
            .unwrap()
            .with_expression("//a", "1")
            .unwrap();
        let texts: Vec<&str> = context.expressions().iter().map(|(e, _)| e.raw()).collect();
        assert_eq!(texts, vec!["//b", "//a"]);
    }

    #[test]
    fn test_xml_context_defaults() {
        let context = XmlValidationContext::new();
        assert!(context.is_schema_validation_enabled());
        assert!(context.ignore().is_empty());

        let context = context
            .with_ignore_expressions(["root.a", "//b"])
            .unwrap()
            .with_schema_validation(false)
            .with_schema_repository("repo");
        assert_eq!(context.ignore().rules().len(), 2);
        assert!(!context.is_schema_validation_enabled());
        assert_eq!(context.schema_repository(), Some("repo"));
    }

    #[test]
    fn test_expected_value_display() {
        assert_eq!(ExpectedValue::from("x").to_string(), "x");
        assert_eq!(
            ExpectedValue::List(vec!["A".into(), "B".into()]).to_string(),
            "[A, B]"
        );
        assert_eq!(ExpectedValue::HasSize(2).to_string(), "a collection with size <2>");
    }
}
