//! Extraction of payload values into test variables.

use std::collections::BTreeMap;

use tracing::debug;

use crate::context::TestContext;
use crate::document::XmlDocument;
use crate::error::{AssertError, Result};
use crate::expression::{PathExpression, PathExpressionResult, ResultType, node_value};
use crate::message::Message;
use crate::namespace::{NamespaceContext, NamespaceContextBuilder};
use crate::validation::ExpressionEntry;

/// Reads values from the received payload and stores them as variables.
///
/// Path queries evaluate as strings unless typed, node-sets are stored
/// comma-joined. A lenient extractor stores an empty string for expressions
/// that find nothing; assignments made before a failing expression are kept.
#[derive(Debug, Clone, Default)]
pub struct XpathPayloadVariableExtractor {
    lenient: bool,
    expressions: Vec<(ExpressionEntry, String)>,
    namespaces: BTreeMap<String, String>,
    namespace_builder: NamespaceContextBuilder,
}

impl XpathPayloadVariableExtractor {
    pub fn new(lenient: bool) -> Self {
        Self {
            lenient,
            ..Self::default()
        }
    }

    /// Adds an expression whose value is stored under `variable`.
    pub fn with_expression(mut self, expression: &str, variable: impl Into<String>) -> Result<Self> {
        self.expressions
            .push((ExpressionEntry::new(expression)?, variable.into()));
        Ok(self)
    }

    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.insert(prefix.into(), uri.into());
        self
    }

    pub fn with_namespace_builder(mut self, builder: NamespaceContextBuilder) -> Self {
        self.namespace_builder = builder;
        self
    }

    pub fn is_lenient(&self) -> bool {
        self.lenient
    }

    pub fn expressions(&self) -> &[(ExpressionEntry, String)] {
        &self.expressions
    }

    pub fn extract(&self, message: &Message, context: &mut TestContext) -> Result<()> {
        if self.expressions.is_empty() {
            return Ok(());
        }

        debug!("Reading XML elements with XPath");

        let payload = message.payload_as_text().unwrap_or_default();
        let document = XmlDocument::parse(&payload)?;
        let namespaces = self.namespace_builder.build_context(&document, &self.namespaces);

        for (entry, variable) in &self.expressions {
            let expression = match entry.resolve(context) {
                Ok(expression) => expression,
                Err(err) if self.lenient && err.is_expression_error() => {
                    debug!(expression = entry.raw(), error = %err, "Lenient extraction stores an empty value");
                    context.set_variable(variable.clone(), String::new());
                    continue;
                }
                Err(err) => return Err(err),
            };
            debug!("Evaluating XPath expression: {}", expression.text());

            let value = match self.evaluate(&expression, &document, &namespaces) {
                Ok(Some(value)) => value,
                Ok(None) if self.lenient => String::new(),
                Ok(None) => return Err(not_found(&expression)),
                Err(err) if self.lenient && err.is_expression_error() => {
                    debug!(error = %err, "Lenient extraction stores an empty value");
                    String::new()
                }
                Err(err) => return Err(err),
            };
            context.set_variable(variable.clone(), value);
        }

        Ok(())
    }

    fn evaluate(
        &self,
        expression: &PathExpression,
        document: &XmlDocument,
        namespaces: &NamespaceContext,
    ) -> Result<Option<String>> {
        if expression.is_path_query() {
            let result_type = expression.result_type().unwrap_or(ResultType::String);
            Ok(expression
                .evaluate(document, namespaces, result_type)?
                .map(|result| match result {
                    PathExpressionResult::NodeSet(values) => values.join(","),
                    other => other.to_string(),
                }))
        } else {
            Ok(expression
                .find_node(document, namespaces)?
                .map(|node| node_value(&node)))
        }
    }
}

fn not_found(expression: &PathExpression) -> AssertError {
    match expression {
        PathExpression::DotShorthand { text, .. } => {
            AssertError::UnknownElement(format!("No element found for expression {}", text))
        }
        PathExpression::PathQuery { text, .. } => AssertError::ExpressionEvaluation(format!(
            "No result for XPath expression: '{}'",
            text
        )),
    }
}
