//! Validation of single values addressed by path expressions.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::{AssertionFailure, TestContext};
use crate::document::XmlDocument;
use crate::error::{AssertError, Result};
use crate::expression::{PathExpression, PathExpressionResult, ResultType, node_value};
use crate::ignore::IgnoreRules;
use crate::matcher::{DefaultMatcherResolver, MatcherResolver};
use crate::message::Message;
use crate::namespace::{NamespaceContext, NamespaceContextBuilder};
use crate::validation::{ExpectedValue, XpathValidationContext};
use crate::xpath::XPathValue;

/// Outcome of evaluating one expression against the received document.
enum Evaluation {
    Value(PathExpressionResult),
    Ignored,
    NotFound,
}

/// Validates path expressions of the received payload against expected values.
///
/// Strict validators fail on the first mismatch. Lenient validators record an
/// [`AssertionFailure`] in the test context for every mismatch and keep going.
pub struct XpathMessageValidator {
    lenient: bool,
    namespace_builder: NamespaceContextBuilder,
    matchers: Arc<dyn MatcherResolver>,
}

impl Default for XpathMessageValidator {
    fn default() -> Self {
        Self::new(false)
    }
}

impl XpathMessageValidator {
    pub fn new(lenient: bool) -> Self {
        Self {
            lenient,
            namespace_builder: NamespaceContextBuilder::new(),
            matchers: Arc::new(DefaultMatcherResolver::new()),
        }
    }

    pub fn lenient() -> Self {
        Self::new(true)
    }

    pub fn with_namespace_builder(mut self, builder: NamespaceContextBuilder) -> Self {
        self.namespace_builder = builder;
        self
    }

    pub fn with_matcher_resolver(mut self, matchers: Arc<dyn MatcherResolver>) -> Self {
        self.matchers = matchers;
        self
    }

    pub fn is_lenient(&self) -> bool {
        self.lenient
    }

    pub fn validate(
        &self,
        received: &Message,
        validation: &XpathValidationContext,
        context: &mut TestContext,
    ) -> Result<()> {
        if validation.is_empty() {
            return Ok(());
        }

        let Some(payload) = received.payload_as_text().filter(|p| !p.trim().is_empty()) else {
            return Err(AssertError::StructuralMismatch(
                "Unable to validate message elements - receive message payload was empty"
                    .to_string(),
            ));
        };

        debug!("Start XPath element validation ...");

        let document = XmlDocument::parse(&payload)?;
        let namespaces = self
            .namespace_builder
            .build_context(&document, validation.namespaces());

        for (entry, expected) in validation.expressions() {
            let resolved = entry
                .resolve(context)
                .and_then(|expression| Ok((expression, resolve_expected(expected, context)?)));
            let (expression, expected) = match resolved {
                Ok(resolved) => resolved,
                Err(err) if self.lenient && err.is_expression_error() => {
                    warn!(expression = entry.raw(), error = %err, "Expression could not be resolved");
                    context.add_failure(AssertionFailure::new(
                        entry.raw(),
                        expected.to_string(),
                        String::new(),
                    ));
                    continue;
                }
                Err(err) => return Err(err),
            };

            let evaluation = match self.evaluate(&expression, &document, &namespaces, validation.ignore()) {
                Err(err) if self.lenient && err.is_expression_error() => {
                    warn!(expression = %expression, error = %err, "Expression could not be evaluated");
                    Evaluation::NotFound
                }
                other => other?,
            };

            let actual = match evaluation {
                Evaluation::Ignored => continue,
                Evaluation::Value(value) => value,
                Evaluation::NotFound if self.lenient => PathExpressionResult::String(String::new()),
                Evaluation::NotFound => return Err(not_found(&expression)),
            };

            match self.compare(&actual, &expected, expression.text(), context) {
                Ok(()) => {
                    debug!("Validating element: {}='{}': OK.", expression.text(), expected);
                }
                Err(err) if self.lenient && err.is_mismatch() => {
                    debug!(error = %err, "Recording lenient XPath assertion failure");
                    context.add_failure(AssertionFailure::new(
                        expression.text(),
                        expected.to_string(),
                        actual.to_string(),
                    ));
                }
                Err(err) => return Err(err),
            }
        }

        info!("XPath element validation successful: All elements OK");
        Ok(())
    }

    /// Untyped path queries are evaluated as a node, so that ignore rules can
    /// apply, and compared by that node's value.
    fn evaluate(
        &self,
        expression: &PathExpression,
        document: &XmlDocument,
        namespaces: &NamespaceContext,
        ignore: &IgnoreRules,
    ) -> Result<Evaluation> {
        match expression {
            PathExpression::DotShorthand { .. } => {
                match expression.find_node(document, namespaces)? {
                    None => Ok(Evaluation::NotFound),
                    Some(node) if ignore.is_ignored(&node, namespaces)? => Ok(Evaluation::Ignored),
                    Some(node) => Ok(Evaluation::Value(PathExpressionResult::Node(node_value(&node)))),
                }
            }
            PathExpression::PathQuery {
                result_type: None,
                compiled,
                ..
            } => match compiled.evaluate(document.root(), namespaces)? {
                XPathValue::NodeSet(nodes) => match nodes.first() {
                    None => Ok(Evaluation::NotFound),
                    Some(node) if ignore.is_ignored(node, namespaces)? => Ok(Evaluation::Ignored),
                    Some(node) => Ok(Evaluation::Value(PathExpressionResult::Node(node_value(node)))),
                },
                scalar => Ok(Evaluation::Value(PathExpressionResult::String(scalar.to_string()))),
            },
            PathExpression::PathQuery {
                result_type: Some(ResultType::Node),
                ..
            } => match expression.find_node(document, namespaces)? {
                None => Ok(Evaluation::NotFound),
                Some(node) if ignore.is_ignored(&node, namespaces)? => Ok(Evaluation::Ignored),
                Some(node) => Ok(Evaluation::Value(PathExpressionResult::Node(node_value(&node)))),
            },
            PathExpression::PathQuery {
                result_type: Some(result_type),
                ..
            } => Ok(expression
                .evaluate(document, namespaces, *result_type)?
                .map_or(Evaluation::NotFound, Evaluation::Value)),
        }
    }

    fn compare(
        &self,
        actual: &PathExpressionResult,
        expected: &ExpectedValue,
        path: &str,
        context: &TestContext,
    ) -> Result<()> {
        let base = format!("Values not equal for element '{}'", path);

        match expected {
            ExpectedValue::Text(text) => {
                let actual_text = actual.to_string();
                if self.matchers.is_matcher_expression(text) {
                    return self.matchers.resolve(path, &actual_text, text, context);
                }
                let equal = match actual {
                    PathExpressionResult::NodeSet(values) => *values == parse_list(text),
                    _ => actual_text == *text,
                };
                if equal {
                    Ok(())
                } else {
                    Err(AssertError::mismatch(base, text, actual_text))
                }
            }
            ExpectedValue::List(values) => {
                check(items(actual) == *values, base, expected, actual)
            }
            ExpectedValue::HasSize(size) => check(items(actual).len() == *size, base, expected, actual),
            ExpectedValue::ContainsAll(values) => {
                let actual_items = items(actual);
                check(
                    values.iter().all(|v| actual_items.contains(v)),
                    base,
                    expected,
                    actual,
                )
            }
            ExpectedValue::ContainsInOrder(values) => {
                let actual_items = items(actual);
                let mut remaining = actual_items.iter();
                check(
                    values.iter().all(|v| remaining.any(|a| a == v)),
                    base,
                    expected,
                    actual,
                )
            }
            ExpectedValue::GreaterThan(bound) => {
                check(actual.as_number().is_some_and(|n| n > *bound), base, expected, actual)
            }
            ExpectedValue::LessThan(bound) => {
                check(actual.as_number().is_some_and(|n| n < *bound), base, expected, actual)
            }
        }
    }
}

fn check(
    passed: bool,
    base: String,
    expected: &ExpectedValue,
    actual: &PathExpressionResult,
) -> Result<()> {
    if passed {
        Ok(())
    } else {
        Err(AssertError::mismatch(base, expected, actual))
    }
}

/// Node-set values, or the single value of a scalar result.
fn items(actual: &PathExpressionResult) -> Vec<String> {
    match actual {
        PathExpressionResult::NodeSet(values) => values.clone(),
        other => vec![other.to_string()],
    }
}

/// Reads `[A, B]`, `A,B` or an empty text as a list of trimmed items.
fn parse_list(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    if inner.trim().is_empty() {
        return Vec::new();
    }
    inner.split(',').map(|item| item.trim().to_string()).collect()
}

fn not_found(expression: &PathExpression) -> AssertError {
    match expression {
        PathExpression::DotShorthand { text, .. } => AssertError::UnknownElement(format!(
            "Element ' {} could not be found in DOM tree",
            text
        )),
        PathExpression::PathQuery { text, .. } => AssertError::ExpressionEvaluation(format!(
            "Unknown element: no result for XPath expression '{}'",
            text
        )),
    }
}

/// Expected text may refer to test variables as well.
fn resolve_expected(expected: &ExpectedValue, context: &TestContext) -> Result<ExpectedValue> {
    match expected {
        ExpectedValue::Text(text) => Ok(ExpectedValue::Text(context.replace_dynamic_content(text)?)),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = "<root>\
        <element attributeA='attribute-value' attributeB='attribute-value'>\
        <sub-elementA attribute='A'>text-value</sub-elementA>\
        <sub-elementB attribute='B'>text-value</sub-elementB>\
        <sub-elementC attribute='C'>text-value</sub-elementC>\
        </element>\
        <numbers><n>1</n><n>2</n><n>3</n></numbers>\
        </root>";

    fn run(
        validator: &XpathMessageValidator,
        validation: &XpathValidationContext,
        context: &mut TestContext,
    ) -> Result<()> {
        validator.validate(&Message::new(XML), validation, context)
    }

    fn strict(pairs: &[(&str, &str)]) -> Result<()> {
        let mut validation = XpathValidationContext::new();
        for (expression, expected) in pairs {
            validation = validation.with_expression(expression, *expected).unwrap();
        }
        run(&XpathMessageValidator::new(false), &validation, &mut TestContext::new())
    }

    #[test]
    fn test_path_query_and_dot_shorthand() {
        strict(&[
            ("//element/sub-elementA", "text-value"),
            ("//element/@attributeA", "attribute-value"),
            ("root.element.sub-elementB", "text-value"),
            ("root.element.attributeB", "attribute-value"),
            ("string:name(//*[@attribute='C'])", "sub-elementC"),
        ])
        .unwrap();
    }

    #[test]
    fn test_typed_results() {
        strict(&[
            ("number:count(//n)", "3.0"),
            ("integer:sum(//n)", "6"),
            ("boolean:count(//n) = 3", "true"),
            ("node-set://n", "[1, 2, 3]"),
            ("node-set://n", "1,2,3"),
            ("node-set://missing", "[]"),
        ])
        .unwrap();
    }

    #[test]
    fn test_mismatch_strict() {
        let err = strict(&[("//element/sub-elementA", "other")]).unwrap_err();
        assert!(err.is_mismatch());
        assert_eq!(
            err.to_string(),
            "Values not equal for element '//element/sub-elementA', expected 'other' but was 'text-value'"
        );
    }

    #[test]
    fn test_not_found_kinds() {
        let err = strict(&[("//c", "anything")]).unwrap_err();
        assert!(err.is_expression_error());
        assert!(err.to_string().to_lowercase().contains("unknown element"));

        let err = strict(&[("root.missing", "anything")]).unwrap_err();
        assert!(err.is_unknown_element());
    }

    #[test]
    fn test_lenient_records_failures() {
        let validation = XpathValidationContext::new()
            .with_expression("//c", "anything")
            .unwrap()
            .with_expression("root.missing", "")
            .unwrap()
            .with_expression("string://element/sub-elementA", "wrong")
            .unwrap()
            .with_expression("//element/sub-elementB", "text-value")
            .unwrap();
        let mut context = TestContext::new();
        run(&XpathMessageValidator::lenient(), &validation, &mut context).unwrap();

        assert_eq!(
            context.failures(),
            &[
                AssertionFailure::new("//c", "anything", ""),
                AssertionFailure::new("//element/sub-elementA", "wrong", "text-value"),
            ]
        );
    }

    #[test]
    fn test_lenient_records_unresolvable_expressions() {
        let validation = XpathValidationContext::new()
            .with_expression("//${missing}", "x")
            .unwrap()
            .with_expression("//element/${broken}", "y")
            .unwrap()
            .with_expression("//element/sub-elementA", "${unknown}")
            .unwrap()
            .with_expression("//element/sub-elementB", "text-value")
            .unwrap();
        let mut context = TestContext::new();
        context.set_variable("broken", "[");

        run(&XpathMessageValidator::lenient(), &validation, &mut context).unwrap();
        assert_eq!(
            context.failures(),
            &[
                AssertionFailure::new("//${missing}", "x", ""),
                AssertionFailure::new("//element/${broken}", "y", ""),
                AssertionFailure::new("//element/sub-elementA", "${unknown}", ""),
            ]
        );

        let err = run(&XpathMessageValidator::new(false), &validation, &mut TestContext::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown variable 'missing'");
    }

    #[test]
    fn test_ignored_expressions_are_skipped() {
        let validation = XpathValidationContext::new()
            .with_expression("//element/sub-elementA", "wrong")
            .unwrap()
            .with_ignore_expressions(["//element/sub-elementA"])
            .unwrap();
        run(&XpathMessageValidator::new(false), &validation, &mut TestContext::new()).unwrap();
    }

    #[test]
    fn test_matchers_and_variables() {
        let validation = XpathValidationContext::new()
            .with_expression("//element/@attributeA", "@startsWith('attribute-')@")
            .unwrap()
            .with_expression("//element/${child}", "${expected}")
            .unwrap();
        let mut context = TestContext::new();
        context.set_variable("child", "sub-elementC");
        context.set_variable("expected", "text-value");
        run(&XpathMessageValidator::new(false), &validation, &mut context).unwrap();
    }

    #[test]
    fn test_collection_expectations() {
        let validation = XpathValidationContext::new()
            .with_expression("node-set://n", ExpectedValue::HasSize(3))
            .unwrap()
            .with_expression("node-set://n", ExpectedValue::ContainsAll(vec!["3".into(), "1".into()]))
            .unwrap()
            .with_expression(
                "node-set://n",
                ExpectedValue::ContainsInOrder(vec!["1".into(), "3".into()]),
            )
            .unwrap()
            .with_expression("number:count(//n)", ExpectedValue::GreaterThan(2.0))
            .unwrap()
            .with_expression("//n[1]", ExpectedValue::LessThan(2.0))
            .unwrap();
        run(&XpathMessageValidator::new(false), &validation, &mut TestContext::new()).unwrap();

        let out_of_order = XpathValidationContext::new()
            .with_expression(
                "node-set://n",
                ExpectedValue::ContainsInOrder(vec!["3".into(), "1".into()]),
            )
            .unwrap();
        let err = run(&XpathMessageValidator::new(false), &out_of_order, &mut TestContext::new())
            .unwrap_err();
        assert!(err.to_string().contains("a collection containing in order [3, 1]"));
    }

    #[test]
    fn test_empty_payload_and_empty_context() {
        let validator = XpathMessageValidator::new(false);
        let validation = XpathValidationContext::new().with_expression("//a", "x").unwrap();
        let err = validator
            .validate(&Message::new("  "), &validation, &mut TestContext::new())
            .unwrap_err();
        assert!(err.to_string().contains("payload was empty"));

        validator
            .validate(&Message::new(""), &XpathValidationContext::new(), &mut TestContext::new())
            .unwrap();
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("[A, B]"), vec!["A", "B"]);
        assert_eq!(parse_list("A,B"), vec!["A", "B"]);
        assert!(parse_list("[]").is_empty());
        assert!(parse_list("").is_empty());
    }
}
