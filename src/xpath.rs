//! Path-query language (XPath 1.0 subset) over [`XmlDocument`](crate::document::XmlDocument).
//!
//! Expressions are parsed once into a [`CompiledXPath`] and evaluated against any node
//! with a [`NamespaceContext`] that resolves the prefixes used in the expression.

mod ast;
mod engine;
mod functions;
mod parser;

use thiserror::Error;

use crate::document::XmlNode;
use crate::error::AssertError;
use crate::namespace::NamespaceContext;

pub use engine::{XPathValue, format_number};

use ast::Expression;
use engine::EvaluationContext;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum XPathError {
    #[error("XPath parse error in '{expression}': {message}")]
    Parse { expression: String, message: String },

    #[error("Namespace prefix '{0}' is not bound")]
    UnboundPrefix(String),

    #[error("Unknown XPath function '{0}'")]
    UnknownFunction(String),

    #[error("Function '{function}' error: {message}")]
    Function { function: String, message: String },

    #[error("Type error: {0}")]
    Type(String),
}

impl From<XPathError> for AssertError {
    fn from(err: XPathError) -> Self {
        AssertError::ExpressionEvaluation(err.to_string())
    }
}

/// A parsed expression ready for repeated evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledXPath {
    text: String,
    expr: Expression,
}

impl CompiledXPath {
    pub fn compile(text: &str) -> Result<Self, XPathError> {
        Ok(Self {
            text: text.to_string(),
            expr: parser::parse_expression(text)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Evaluates with `node` as context node and the owning document as root.
    pub fn evaluate<'a>(
        &self,
        node: XmlNode<'a>,
        namespaces: &NamespaceContext,
    ) -> Result<XPathValue<'a>, XPathError> {
        engine::evaluate(&self.expr, &EvaluationContext::new(node, namespaces))
    }
}
