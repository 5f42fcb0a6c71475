//! The two ways of addressing a node: path queries (`//order/@id`, optionally
//! typed with a result prefix like `number:`) and dot-shorthand (`order.item.id`).

use std::fmt;

use tracing::trace;

use crate::document::{XmlDocument, XmlNode};
use crate::error::{AssertError, Result};
use crate::namespace::NamespaceContext;
use crate::xpath::{CompiledXPath, XPathValue};

/// Result type requested through an expression prefix such as `node-set:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Node,
    NodeSet,
    String,
    Number,
    Integer,
    Boolean,
}

impl ResultType {
    // "node-set:" must be tested before "node:"
    const PREFIXES: [(&'static str, ResultType); 6] = [
        ("node-set:", ResultType::NodeSet),
        ("node:", ResultType::Node),
        ("string:", ResultType::String),
        ("number:", ResultType::Number),
        ("integer:", ResultType::Integer),
        ("boolean:", ResultType::Boolean),
    ];

    /// Splits a leading type prefix off an expression.
    pub fn split_prefix(expression: &str) -> (Option<ResultType>, &str) {
        for (prefix, result_type) in Self::PREFIXES {
            if let Some(rest) = expression.strip_prefix(prefix) {
                return (Some(result_type), rest);
            }
        }
        (None, expression)
    }
}

/// Path-query syntax is recognised by a slash or a parenthesis.
pub fn is_path_query(expression: &str) -> bool {
    expression.contains('/') || expression.contains('(')
}

/// A parsed node address.
#[derive(Debug, Clone, PartialEq)]
pub enum PathExpression {
    PathQuery {
        /// Expression text without the type prefix
        text: String,
        result_type: Option<ResultType>,
        compiled: CompiledXPath,
    },
    DotShorthand { text: String, segments: Vec<String> },
}

impl PathExpression {
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        if is_path_query(expression) {
            let (result_type, text) = ResultType::split_prefix(expression);
            let compiled = CompiledXPath::compile(text)?;
            Ok(PathExpression::PathQuery {
                text: text.to_string(),
                result_type,
                compiled,
            })
        } else {
            let segments: Vec<String> = expression
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if segments.is_empty() {
                return Err(AssertError::ExpressionEvaluation(format!(
                    "Invalid element path expression '{}'",
                    expression
                )));
            }
            Ok(PathExpression::DotShorthand {
                text: expression.to_string(),
                segments,
            })
        }
    }

    /// Expression text as reported in errors and failure records.
    pub fn text(&self) -> &str {
        match self {
            PathExpression::PathQuery { text, .. } | PathExpression::DotShorthand { text, .. } => {
                text
            }
        }
    }

    pub fn is_path_query(&self) -> bool {
        matches!(self, PathExpression::PathQuery { .. })
    }

    /// Explicit result type, if the expression carried a prefix.
    pub fn result_type(&self) -> Option<ResultType> {
        match self {
            PathExpression::PathQuery { result_type, .. } => *result_type,
            PathExpression::DotShorthand { .. } => Some(ResultType::Node),
        }
    }

    /// The single node this expression addresses, if any.
    pub fn find_node<'a>(
        &self,
        document: &'a XmlDocument,
        namespaces: &NamespaceContext,
    ) -> Result<Option<XmlNode<'a>>> {
        match self {
            PathExpression::PathQuery { compiled, .. } => {
                match compiled.evaluate(document.root(), namespaces)? {
                    XPathValue::NodeSet(nodes) => Ok(nodes.first().copied()),
                    other => Err(AssertError::ExpressionEvaluation(format!(
                        "XPath expression '{}' does not select a node, result was '{}'",
                        compiled.as_str(),
                        other
                    ))),
                }
            }
            PathExpression::DotShorthand { segments, .. } => {
                Ok(find_node_by_name(document, segments))
            }
        }
    }

    /// Evaluates a path query to the requested type. `Ok(None)` means the
    /// expression found nothing; how that is reported is up to the caller.
    pub fn evaluate(
        &self,
        document: &XmlDocument,
        namespaces: &NamespaceContext,
        result_type: ResultType,
    ) -> Result<Option<PathExpressionResult>> {
        let compiled = match self {
            PathExpression::PathQuery { compiled, .. } => compiled,
            PathExpression::DotShorthand { .. } => {
                return Ok(self
                    .find_node(document, namespaces)?
                    .map(|node| PathExpressionResult::Node(node_value(&node))));
            }
        };

        let value = compiled.evaluate(document.root(), namespaces)?;
        trace!(expression = compiled.as_str(), ?result_type, "Evaluated path query");

        let result = match result_type {
            ResultType::Node => match value {
                XPathValue::NodeSet(nodes) => {
                    nodes.first().map(|n| PathExpressionResult::Node(node_value(n)))
                }
                other => return Err(not_a_node_set(compiled, &other)),
            },
            ResultType::NodeSet => match value {
                XPathValue::NodeSet(nodes) => Some(PathExpressionResult::NodeSet(
                    nodes.iter().map(node_value).collect(),
                )),
                other => return Err(not_a_node_set(compiled, &other)),
            },
            ResultType::String => {
                let text = value.to_string();
                let selects_node = matches!(&value, XPathValue::NodeSet(nodes) if !nodes.is_empty());
                if text.trim().is_empty() && !selects_node {
                    None
                } else {
                    Some(PathExpressionResult::String(text))
                }
            }
            ResultType::Number => Some(PathExpressionResult::Number(value.to_number())),
            ResultType::Integer => {
                let n = value.to_number();
                let rounded = if n.is_nan() { 0 } else { (n + 0.5).floor() as i64 };
                Some(PathExpressionResult::Integer(rounded))
            }
            ResultType::Boolean => Some(PathExpressionResult::Boolean(value.to_bool())),
        };
        Ok(result)
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

fn not_a_node_set(compiled: &CompiledXPath, value: &XPathValue<'_>) -> AssertError {
    AssertError::ExpressionEvaluation(format!(
        "XPath expression '{}' does not select nodes, result was '{}'",
        compiled.as_str(),
        value
    ))
}

/// Typed value of an evaluated expression.
#[derive(Debug, Clone, PartialEq)]
pub enum PathExpressionResult {
    Node(String),
    NodeSet(Vec<String>),
    String(String),
    Number(f64),
    Integer(i64),
    Boolean(bool),
}

impl PathExpressionResult {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PathExpressionResult::Number(n) => Some(*n),
            PathExpressionResult::Integer(i) => Some(*i as f64),
            PathExpressionResult::Node(s) | PathExpressionResult::String(s) => s.trim().parse().ok(),
            PathExpressionResult::NodeSet(_) | PathExpressionResult::Boolean(_) => None,
        }
    }
}

impl fmt::Display for PathExpressionResult {
    /// Node-sets print comma-joined.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathExpressionResult::Node(s) | PathExpressionResult::String(s) => f.write_str(s),
            PathExpressionResult::NodeSet(values) => f.write_str(&values.join(",")),
            PathExpressionResult::Number(n) => f.write_str(&format_decimal(*n)),
            PathExpressionResult::Integer(i) => write!(f, "{}", i),
            PathExpressionResult::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// Decimal rendering with a mandatory fraction digit (`2.0`) and
/// scientific notation for very large or very small magnitudes (`1.0E7`).
pub fn format_decimal(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = n.abs();
    if magnitude != 0.0 && !(1e-3..1e7).contains(&magnitude) {
        let formatted = format!("{:e}", n);
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((formatted.as_str(), "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{}.0", mantissa)
        };
        return format!("{}E{}", mantissa, exponent);
    }
    if n.fract() == 0.0 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

/// Value of a node: an element's first child value (empty if it has none or the
/// first child is itself an element), otherwise the node's own value.
pub fn node_value(node: &XmlNode<'_>) -> String {
    if node.is_element() {
        node.first_child()
            .and_then(|child| child.value())
            .unwrap_or_default()
            .to_string()
    } else {
        node.value().unwrap_or_default().to_string()
    }
}

/// Resolves dot-shorthand by tag name.
///
/// A single segment returns the first element with that local name. Longer chains
/// return the first element whose ancestor chain ends with the given names; if no
/// element carries the last name it is taken as an attribute of the node the
/// remaining chain resolves to.
pub fn find_node_by_name<'a>(document: &'a XmlDocument, segments: &[String]) -> Option<XmlNode<'a>> {
    let (last, parents) = segments.split_last()?;
    let mut candidates = document
        .elements()
        .filter(|e| e.local_name() == Some(last.as_str()))
        .peekable();

    if parents.is_empty() {
        return candidates.next();
    }

    if candidates.peek().is_none() {
        let owner = find_node_by_name(document, parents)?;
        return owner
            .attributes()
            .find(|a| a.qualified_name() == *last || a.local_name() == Some(last.as_str()));
    }

    candidates.find(|element| chain_matches(element, parents))
}

/// True if the nearest ancestors of `node` carry `parents` (outermost first).
pub(crate) fn chain_matches(node: &XmlNode<'_>, parents: &[String]) -> bool {
    let mut ancestors = node.ancestors().filter(|a| a.is_element() || a.is_attribute());
    parents
        .iter()
        .rev()
        .all(|name| ancestors.next().and_then(|a| a.local_name()) == Some(name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = "<root>\
        <element attributeA='attribute-value' attributeB='attribute-value'>\
        <sub-element attribute='A'>text-value</sub-element>\
        <sub-element attribute='B'>other-value</sub-element>\
        </element>\
        <empty/>\
        </root>";

    fn eval(expr: &str, result_type: ResultType) -> Option<PathExpressionResult> {
        let doc = XmlDocument::parse(XML).unwrap();
        PathExpression::parse(expr)
            .unwrap()
            .evaluate(&doc, &NamespaceContext::new(), result_type)
            .unwrap()
    }

    #[test]
    fn test_split_prefix() {
        assert_eq!(
            ResultType::split_prefix("node-set://a"),
            (Some(ResultType::NodeSet), "//a")
        );
        assert_eq!(ResultType::split_prefix("node://a"), (Some(ResultType::Node), "//a"));
        assert_eq!(
            ResultType::split_prefix("integer:count(//a)"),
            (Some(ResultType::Integer), "count(//a)")
        );
        assert_eq!(ResultType::split_prefix("//a"), (None, "//a"));
    }

    #[test]
    fn test_syntax_detection() {
        assert!(PathExpression::parse("//element").unwrap().is_path_query());
        assert!(PathExpression::parse("count(a)").unwrap().is_path_query());
        let dot = PathExpression::parse("root.element.sub-element").unwrap();
        assert!(!dot.is_path_query());
        assert_eq!(dot.result_type(), Some(ResultType::Node));
        assert!(PathExpression::parse("//a[").unwrap_err().is_expression_error());
    }

    #[test]
    fn test_typed_results() {
        assert_eq!(
            eval("//element/sub-element", ResultType::String),
            Some(PathExpressionResult::String("text-value".into()))
        );
        assert_eq!(
            eval("//element/sub-element", ResultType::NodeSet).unwrap().to_string(),
            "text-value,other-value"
        );
        assert_eq!(
            eval("number:count(//sub-element)", ResultType::Number).unwrap().to_string(),
            "2.0"
        );
        assert_eq!(
            eval("count(//sub-element)", ResultType::Integer).unwrap().to_string(),
            "2"
        );
        assert_eq!(
            eval("//element/other-element", ResultType::Boolean),
            Some(PathExpressionResult::Boolean(false))
        );
        assert_eq!(
            eval("//element/other-element", ResultType::NodeSet),
            Some(PathExpressionResult::NodeSet(vec![]))
        );
    }

    #[test]
    fn test_not_found() {
        assert_eq!(eval("//missing", ResultType::String), None);
        assert_eq!(eval("//missing", ResultType::Node), None);
        // An empty element still exists
        assert_eq!(
            eval("//empty", ResultType::String),
            Some(PathExpressionResult::String(String::new()))
        );
    }

    #[test]
    fn test_dot_shorthand_lookup() {
        let doc = XmlDocument::parse(XML).unwrap();
        let find = |expr: &str| {
            let segments: Vec<String> = expr.split('.').map(str::to_string).collect();
            find_node_by_name(&doc, &segments).map(|n| node_value(&n))
        };

        assert_eq!(find("sub-element"), Some("text-value".into()));
        assert_eq!(find("root.element.sub-element"), Some("text-value".into()));
        assert_eq!(find("element.sub-element"), Some("text-value".into()));
        assert_eq!(find("root.element.attributeA"), Some("attribute-value".into()));
        assert_eq!(find("root.element.sub-element.attribute"), Some("A".into()));
        assert_eq!(find("root.empty"), Some(String::new()));
        assert_eq!(find("root.foo.bar"), None);
        assert_eq!(find("other.sub-element"), None);
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(2.0), "2.0");
        assert_eq!(format_decimal(2.5), "2.5");
        assert_eq!(format_decimal(-3.0), "-3.0");
        assert_eq!(format_decimal(1e7), "1.0E7");
        assert_eq!(format_decimal(f64::NAN), "NaN");
        assert_eq!(format_decimal(f64::INFINITY), "Infinity");
    }

    #[test]
    fn test_numeric_view() {
        assert_eq!(PathExpressionResult::Integer(3).as_number(), Some(3.0));
        assert_eq!(PathExpressionResult::String(" 4.5 ".into()).as_number(), Some(4.5));
        assert_eq!(PathExpressionResult::Boolean(true).as_number(), None);
    }
}
