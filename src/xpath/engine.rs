//! Evaluates a parsed expression against an [`XmlDocument`](crate::document::XmlDocument).

use std::cmp::Ordering;
use std::fmt;

use super::XPathError;
use super::ast::{
    Axis, BinaryOperator, Expression, LocationPath, NodeTest, NodeTypeTest, Step, UnaryOperator,
};
use super::functions;
use crate::document::{NodeKind, XmlNode};
use crate::namespace::NamespaceContext;

/// Result of an expression evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum XPathValue<'a> {
    /// Nodes in document order without duplicates
    NodeSet(Vec<XmlNode<'a>>),
    String(String),
    Number(f64),
    Boolean(bool),
}

impl<'a> XPathValue<'a> {
    pub fn to_bool(&self) -> bool {
        match self {
            XPathValue::NodeSet(nodes) => !nodes.is_empty(),
            XPathValue::String(s) => !s.is_empty(),
            XPathValue::Number(n) => *n != 0.0 && !n.is_nan(),
            XPathValue::Boolean(b) => *b,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            XPathValue::Number(n) => *n,
            XPathValue::String(s) => parse_number(s),
            XPathValue::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            XPathValue::NodeSet(nodes) => nodes
                .first()
                .map(|n| parse_number(&n.string_value()))
                .unwrap_or(f64::NAN),
        }
    }

    pub fn is_node_set(&self) -> bool {
        matches!(self, XPathValue::NodeSet(_))
    }
}

impl fmt::Display for XPathValue<'_> {
    /// String conversion; node-sets use the string-value of their first node.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XPathValue::NodeSet(nodes) => write!(
                f,
                "{}",
                nodes.first().map(|n| n.string_value()).unwrap_or_default()
            ),
            XPathValue::String(s) => write!(f, "{}", s),
            XPathValue::Number(n) => write!(f, "{}", format_number(*n)),
            XPathValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// Numbers in XPath accept optional surrounding whitespace, a leading minus and no exponent.
pub fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let valid = !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|&c| c == '.').count() <= 1
        && digits != ".";
    if valid {
        trimmed.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

/// XPath string form of a number: integral values print without a fraction.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e18 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Everything needed while evaluating one expression.
/// `'a` is the lifetime of the document, `'d` the lifetime of borrowed settings.
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a, 'd> {
    pub context_node: XmlNode<'a>,
    pub root_node: XmlNode<'a>,
    pub namespaces: &'d NamespaceContext,
    /// 1-based
    pub context_position: usize,
    pub context_size: usize,
}

impl<'a, 'd> EvaluationContext<'a, 'd> {
    pub fn new(context_node: XmlNode<'a>, namespaces: &'d NamespaceContext) -> Self {
        Self {
            context_node,
            root_node: context_node.document().root(),
            namespaces,
            context_position: 1,
            context_size: 1,
        }
    }

    fn at(&self, node: XmlNode<'a>, position: usize, size: usize) -> Self {
        Self {
            context_node: node,
            context_position: position,
            context_size: size,
            ..*self
        }
    }
}

pub fn evaluate<'a>(
    expr: &Expression,
    e_ctx: &EvaluationContext<'a, '_>,
) -> Result<XPathValue<'a>, XPathError> {
    match expr {
        Expression::Literal(s) => Ok(XPathValue::String(s.clone())),
        Expression::Number(n) => Ok(XPathValue::Number(*n)),
        Expression::LocationPath(path) => {
            Ok(XPathValue::NodeSet(evaluate_location_path(path, e_ctx)?))
        }
        Expression::Filter {
            primary,
            predicates,
        } => {
            let nodes = expect_node_set(evaluate(primary, e_ctx)?, "filter expression")?;
            Ok(XPathValue::NodeSet(apply_predicates(
                nodes, predicates, e_ctx,
            )?))
        }
        Expression::FunctionCall { name, args } => {
            let mut evaluated_args = Vec::with_capacity(args.len());
            for arg in args {
                evaluated_args.push(evaluate(arg, e_ctx)?);
            }
            functions::evaluate_function(name, evaluated_args, e_ctx)
        }
        Expression::BinaryOp { left, op, right } => evaluate_binary(left, *op, right, e_ctx),
        Expression::UnaryOp { op, expr } => {
            let val = evaluate(expr, e_ctx)?;
            match op {
                UnaryOperator::Minus => Ok(XPathValue::Number(-val.to_number())),
            }
        }
    }
}

fn expect_node_set<'a>(value: XPathValue<'a>, what: &str) -> Result<Vec<XmlNode<'a>>, XPathError> {
    match value {
        XPathValue::NodeSet(nodes) => Ok(nodes),
        other => Err(XPathError::Type(format!(
            "{} must be a node-set, found '{}'",
            what, other
        ))),
    }
}

fn evaluate_location_path<'a>(
    path: &LocationPath,
    e_ctx: &EvaluationContext<'a, '_>,
) -> Result<Vec<XmlNode<'a>>, XPathError> {
    let mut current_nodes = if let Some(start_expr) = &path.start_point {
        expect_node_set(evaluate(start_expr, e_ctx)?, "path start")?
    } else if path.is_absolute {
        vec![e_ctx.root_node]
    } else {
        vec![e_ctx.context_node]
    };

    for step in &path.steps {
        current_nodes = evaluate_step(step, &current_nodes, e_ctx)?;
    }
    Ok(current_nodes)
}

/// Applies one step to every context node, filtering with per-node positions,
/// and merges the results back into document order.
fn evaluate_step<'a>(
    step: &Step,
    context_nodes: &[XmlNode<'a>],
    e_ctx: &EvaluationContext<'a, '_>,
) -> Result<Vec<XmlNode<'a>>, XPathError> {
    let test = ResolvedTest::resolve(&step.node_test, e_ctx.namespaces)?;

    let mut result = Vec::new();
    for &node in context_nodes {
        let candidates: Vec<XmlNode<'a>> = collect_axis_nodes(step.axis, node)
            .into_iter()
            .filter(|n| test.matches(n, step.axis))
            .collect();
        result.extend(apply_predicates(candidates, &step.predicates, e_ctx)?);
    }

    Ok(document_order(result))
}

fn document_order(mut nodes: Vec<XmlNode<'_>>) -> Vec<XmlNode<'_>> {
    nodes.sort_by_key(|n| n.id());
    nodes.dedup();
    nodes
}

/// Nodes along an axis in axis order; reverse axes yield the nearest node first.
fn collect_axis_nodes<'a>(axis: Axis, node: XmlNode<'a>) -> Vec<XmlNode<'a>> {
    let nodes: Vec<XmlNode<'a>> = match axis {
        Axis::Child => node.children().collect(),
        Axis::Descendant => node.descendants().collect(),
        Axis::DescendantOrSelf => std::iter::once(node).chain(node.descendants()).collect(),
        Axis::Attribute => node.attributes().collect(),
        Axis::Parent => node.parent().into_iter().collect(),
        Axis::Ancestor => node.ancestors().collect(),
        Axis::AncestorOrSelf => std::iter::once(node).chain(node.ancestors()).collect(),
        Axis::SelfAxis => vec![node],
        Axis::FollowingSibling => node.following_siblings().collect(),
        Axis::PrecedingSibling => node.preceding_siblings().collect(),
    };
    nodes
        .into_iter()
        .filter(|n| !matches!(n.kind(), NodeKind::DocumentType { .. }))
        .collect()
}

/// A node test with its prefix already resolved to a namespace URI.
enum ResolvedTest<'t> {
    Name {
        local: &'t str,
        namespace: Option<String>,
    },
    Namespace(String),
    Wildcard,
    NodeType(NodeTypeTest),
}

impl<'t> ResolvedTest<'t> {
    fn resolve(test: &'t NodeTest, namespaces: &NamespaceContext) -> Result<Self, XPathError> {
        let lookup = |prefix: &str| {
            namespaces
                .resolve(prefix)
                .map(str::to_string)
                .ok_or_else(|| XPathError::UnboundPrefix(prefix.to_string()))
        };

        Ok(match test {
            NodeTest::Name(name) => match name.split_once(':') {
                Some((prefix, local)) => ResolvedTest::Name {
                    local,
                    namespace: Some(lookup(prefix)?),
                },
                None => ResolvedTest::Name {
                    local: name,
                    namespace: None,
                },
            },
            NodeTest::NamespaceWildcard(prefix) => ResolvedTest::Namespace(lookup(prefix)?),
            NodeTest::Wildcard => ResolvedTest::Wildcard,
            NodeTest::NodeType(node_type) => ResolvedTest::NodeType(*node_type),
        })
    }

    fn matches(&self, node: &XmlNode<'_>, axis: Axis) -> bool {
        let principal = match axis {
            Axis::Attribute => node.is_attribute(),
            _ => node.is_element(),
        };

        match self {
            ResolvedTest::Name { local, namespace } => {
                principal
                    && node.local_name() == Some(*local)
                    && node.namespace() == namespace.as_deref()
            }
            ResolvedTest::Namespace(uri) => principal && node.namespace() == Some(uri.as_str()),
            ResolvedTest::Wildcard => principal,
            ResolvedTest::NodeType(node_type) => match node_type {
                NodeTypeTest::Node => true,
                NodeTypeTest::Text => node.is_text(),
                NodeTypeTest::Comment => matches!(node.kind(), NodeKind::Comment(_)),
                NodeTypeTest::ProcessingInstruction => {
                    matches!(node.kind(), NodeKind::ProcessingInstruction { .. })
                }
            },
        }
    }
}

fn apply_predicates<'a>(
    nodes: Vec<XmlNode<'a>>,
    predicates: &[Expression],
    e_ctx: &EvaluationContext<'a, '_>,
) -> Result<Vec<XmlNode<'a>>, XPathError> {
    let mut final_nodes = nodes;
    for predicate in predicates {
        let context_size = final_nodes.len();
        let mut kept = Vec::with_capacity(context_size);
        for (i, node) in final_nodes.into_iter().enumerate() {
            let predicate_ctx = e_ctx.at(node, i + 1, context_size);
            let keep = match evaluate(predicate, &predicate_ctx)? {
                XPathValue::Number(n) => n == (i + 1) as f64,
                other => other.to_bool(),
            };
            if keep {
                kept.push(node);
            }
        }
        final_nodes = kept;
    }
    Ok(final_nodes)
}

fn evaluate_binary<'a>(
    left: &Expression,
    op: BinaryOperator,
    right: &Expression,
    e_ctx: &EvaluationContext<'a, '_>,
) -> Result<XPathValue<'a>, XPathError> {
    match op {
        BinaryOperator::Or => {
            let value = evaluate(left, e_ctx)?.to_bool() || evaluate(right, e_ctx)?.to_bool();
            Ok(XPathValue::Boolean(value))
        }
        BinaryOperator::And => {
            let value = evaluate(left, e_ctx)?.to_bool() && evaluate(right, e_ctx)?.to_bool();
            Ok(XPathValue::Boolean(value))
        }
        BinaryOperator::Union => {
            let mut nodes = expect_node_set(evaluate(left, e_ctx)?, "union operand")?;
            nodes.extend(expect_node_set(evaluate(right, e_ctx)?, "union operand")?);
            Ok(XPathValue::NodeSet(document_order(nodes)))
        }
        BinaryOperator::Plus
        | BinaryOperator::Minus
        | BinaryOperator::Multiply
        | BinaryOperator::Divide
        | BinaryOperator::Modulo => {
            let l = evaluate(left, e_ctx)?.to_number();
            let r = evaluate(right, e_ctx)?.to_number();
            Ok(XPathValue::Number(match op {
                BinaryOperator::Plus => l + r,
                BinaryOperator::Minus => l - r,
                BinaryOperator::Multiply => l * r,
                BinaryOperator::Divide => l / r,
                _ => l % r,
            }))
        }
        _ => {
            let l = evaluate(left, e_ctx)?;
            let r = evaluate(right, e_ctx)?;
            Ok(XPathValue::Boolean(compare(op, &l, &r)))
        }
    }
}

/// Comparison with node-set semantics: true if any pair of atomized values satisfies `op`.
fn compare(op: BinaryOperator, left: &XPathValue<'_>, right: &XPathValue<'_>) -> bool {
    match (left, right) {
        (XPathValue::NodeSet(_), XPathValue::Boolean(b)) => {
            compare_scalar(op, &XPathValue::Boolean(left.to_bool()), &XPathValue::Boolean(*b))
        }
        (XPathValue::Boolean(b), XPathValue::NodeSet(_)) => {
            compare_scalar(op, &XPathValue::Boolean(*b), &XPathValue::Boolean(right.to_bool()))
        }
        _ => {
            let lefts = atomize(left);
            let rights = atomize(right);
            lefts
                .iter()
                .any(|l| rights.iter().any(|r| compare_scalar(op, l, r)))
        }
    }
}

fn atomize<'a>(value: &XPathValue<'a>) -> Vec<XPathValue<'a>> {
    match value {
        XPathValue::NodeSet(nodes) => nodes
            .iter()
            .map(|n| XPathValue::String(n.string_value()))
            .collect(),
        other => vec![other.clone()],
    }
}

fn compare_scalar(op: BinaryOperator, left: &XPathValue<'_>, right: &XPathValue<'_>) -> bool {
    match op {
        BinaryOperator::Equals | BinaryOperator::NotEquals => {
            let equal = match (left, right) {
                (XPathValue::Boolean(_), _) | (_, XPathValue::Boolean(_)) => {
                    left.to_bool() == right.to_bool()
                }
                (XPathValue::Number(_), _) | (_, XPathValue::Number(_)) => {
                    left.to_number() == right.to_number()
                }
                _ => left.to_string() == right.to_string(),
            };
            if op == BinaryOperator::Equals {
                equal
            } else {
                !equal
            }
        }
        _ => {
            let ordering = left.to_number().partial_cmp(&right.to_number());
            match (op, ordering) {
                (_, None) => false,
                (BinaryOperator::LessThan, Some(o)) => o == Ordering::Less,
                (BinaryOperator::LessThanOrEqual, Some(o)) => o != Ordering::Greater,
                (BinaryOperator::GreaterThan, Some(o)) => o == Ordering::Greater,
                (BinaryOperator::GreaterThanOrEqual, Some(o)) => o != Ordering::Less,
                _ => false,
            }
        }
    }
}
