//! Core function library available inside path queries.

use super::XPathError;
use super::engine::{EvaluationContext, XPathValue, parse_number};
use crate::document::XmlNode;

/// Dispatches a function call to its implementation.
pub fn evaluate_function<'a>(
    name: &str,
    args: Vec<XPathValue<'a>>,
    e_ctx: &EvaluationContext<'a, '_>,
) -> Result<XPathValue<'a>, XPathError> {
    match name {
        // Node-set
        "last" => {
            arity(name, &args, 0, 0)?;
            Ok(XPathValue::Number(e_ctx.context_size as f64))
        }
        "position" => {
            arity(name, &args, 0, 0)?;
            Ok(XPathValue::Number(e_ctx.context_position as f64))
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            let nodes = node_set_arg(name, args)?;
            Ok(XPathValue::Number(nodes.len() as f64))
        }
        "local-name" => name_of(name, args, e_ctx, |n| {
            n.local_name().unwrap_or_default().to_string()
        }),
        "name" => name_of(name, args, e_ctx, |n| n.qualified_name()),
        "namespace-uri" => name_of(name, args, e_ctx, |n| {
            n.namespace().unwrap_or_default().to_string()
        }),

        // String
        "string" => {
            arity(name, &args, 0, 1)?;
            Ok(XPathValue::String(string_or_context(args, e_ctx)))
        }
        "concat" => {
            arity(name, &args, 2, usize::MAX)?;
            Ok(XPathValue::String(
                args.iter().map(|v| v.to_string()).collect(),
            ))
        }
        "starts-with" => {
            let [s1, s2] = two_strings(name, args)?;
            Ok(XPathValue::Boolean(s1.starts_with(&s2)))
        }
        "contains" => {
            let [s1, s2] = two_strings(name, args)?;
            Ok(XPathValue::Boolean(s1.contains(&s2)))
        }
        "substring-before" => {
            let [s1, s2] = two_strings(name, args)?;
            Ok(XPathValue::String(
                s1.find(&s2).map(|i| s1[..i].to_string()).unwrap_or_default(),
            ))
        }
        "substring-after" => {
            let [s1, s2] = two_strings(name, args)?;
            Ok(XPathValue::String(
                s1.find(&s2)
                    .map(|i| s1[i + s2.len()..].to_string())
                    .unwrap_or_default(),
            ))
        }
        "substring" => substring(name, args),
        "string-length" => {
            arity(name, &args, 0, 1)?;
            let s = string_or_context(args, e_ctx);
            Ok(XPathValue::Number(s.chars().count() as f64))
        }
        "normalize-space" => {
            arity(name, &args, 0, 1)?;
            let s = string_or_context(args, e_ctx);
            Ok(XPathValue::String(
                s.split_whitespace().collect::<Vec<_>>().join(" "),
            ))
        }
        "translate" => {
            arity(name, &args, 3, 3)?;
            let mut strings = args.iter().map(|v| v.to_string());
            let (s, from, to) = (
                strings.next().unwrap_or_default(),
                strings.next().unwrap_or_default(),
                strings.next().unwrap_or_default(),
            );
            Ok(XPathValue::String(translate(&s, &from, &to)))
        }

        // Boolean
        "boolean" => {
            arity(name, &args, 1, 1)?;
            Ok(XPathValue::Boolean(args[0].to_bool()))
        }
        "not" => {
            arity(name, &args, 1, 1)?;
            Ok(XPathValue::Boolean(!args[0].to_bool()))
        }
        "true" => {
            arity(name, &args, 0, 0)?;
            Ok(XPathValue::Boolean(true))
        }
        "false" => {
            arity(name, &args, 0, 0)?;
            Ok(XPathValue::Boolean(false))
        }

        // Number
        "number" => {
            arity(name, &args, 0, 1)?;
            let n = match args.first() {
                Some(value) => value.to_number(),
                None => parse_number(&e_ctx.context_node.string_value()),
            };
            Ok(XPathValue::Number(n))
        }
        "sum" => {
            arity(name, &args, 1, 1)?;
            let nodes = node_set_arg(name, args)?;
            Ok(XPathValue::Number(
                nodes.iter().map(|n| parse_number(&n.string_value())).sum(),
            ))
        }
        "floor" => unary_number(name, args, f64::floor),
        "ceiling" => unary_number(name, args, f64::ceil),
        "round" => unary_number(name, args, |n| {
            if n.is_nan() || n.is_infinite() {
                n
            } else {
                (n + 0.5).floor()
            }
        }),

        _ => Err(XPathError::UnknownFunction(name.to_string())),
    }
}

fn arity(name: &str, args: &[XPathValue<'_>], min: usize, max: usize) -> Result<(), XPathError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{} argument(s)", min)
        } else if max == usize::MAX {
            format!("at least {} arguments", min)
        } else {
            format!("{} to {} arguments", min, max)
        };
        return Err(XPathError::Function {
            function: format!("{}()", name),
            message: format!("Expected {}, got {}", expected, args.len()),
        });
    }
    Ok(())
}

fn node_set_arg<'a>(
    name: &str,
    mut args: Vec<XPathValue<'a>>,
) -> Result<Vec<XmlNode<'a>>, XPathError> {
    match args.remove(0) {
        XPathValue::NodeSet(nodes) => Ok(nodes),
        other => Err(XPathError::Type(format!(
            "{}() argument must be a node-set, got '{}'",
            name, other
        ))),
    }
}

/// Applies `f` to the first node of the argument, or to the context node without one.
fn name_of<'a>(
    name: &str,
    args: Vec<XPathValue<'a>>,
    e_ctx: &EvaluationContext<'a, '_>,
    f: impl Fn(&XmlNode<'a>) -> String,
) -> Result<XPathValue<'a>, XPathError> {
    arity(name, &args, 0, 1)?;
    let node = if args.is_empty() {
        Some(e_ctx.context_node)
    } else {
        node_set_arg(name, args)?.first().copied()
    };
    Ok(XPathValue::String(node.map(|n| f(&n)).unwrap_or_default()))
}

fn string_or_context(mut args: Vec<XPathValue<'_>>, e_ctx: &EvaluationContext<'_, '_>) -> String {
    if args.is_empty() {
        e_ctx.context_node.string_value()
    } else {
        args.remove(0).to_string()
    }
}

fn two_strings(name: &str, args: Vec<XPathValue<'_>>) -> Result<[String; 2], XPathError> {
    arity(name, &args, 2, 2)?;
    Ok([args[0].to_string(), args[1].to_string()])
}

fn unary_number<'a>(
    name: &str,
    args: Vec<XPathValue<'a>>,
    f: impl Fn(f64) -> f64,
) -> Result<XPathValue<'a>, XPathError> {
    arity(name, &args, 1, 1)?;
    Ok(XPathValue::Number(f(args[0].to_number())))
}

fn substring<'a>(name: &str, mut args: Vec<XPathValue<'a>>) -> Result<XPathValue<'a>, XPathError> {
    arity(name, &args, 2, 3)?;
    let length = if args.len() == 3 {
        Some(args.remove(2).to_number())
    } else {
        None
    };
    let start = args.remove(1).to_number();
    let s = args.remove(0).to_string();

    // Positions are 1-based and rounded; NaN bounds select nothing
    let first = (start + 0.5).floor();
    let last = length.map_or(f64::INFINITY, |l| first + (l + 0.5).floor());

    let result = s
        .chars()
        .enumerate()
        .filter(|(i, _)| {
            let pos = (i + 1) as f64;
            pos >= first && pos < last
        })
        .map(|(_, c)| c)
        .collect();
    Ok(XPathValue::String(result))
}

fn translate(s: &str, from: &str, to: &str) -> String {
    let to: Vec<char> = to.chars().collect();
    s.chars()
        .filter_map(|c| match from.chars().position(|f| f == c) {
            Some(index) => to.get(index).copied(),
            None => Some(c),
        })
        .collect()
}
