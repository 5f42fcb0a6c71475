//! Per-test state shared by validators and extractors.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{AssertError, Result};

static VARIABLE_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_variable_regex() -> &'static Regex {
    VARIABLE_REGEX.get_or_init(|| {
        Regex::new(r"\$\{([^{}]+)\}").expect("Failed to compile variable placeholder regex")
    })
}

/// One lenient-mode mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionFailure {
    pub expression: String,
    pub expected: String,
    pub actual: String,
}

impl AssertionFailure {
    pub fn new(
        expression: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            expression: expression.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "XPath assertion failure - {} : expected = {}, actual = {}",
            self.expression, self.expected, self.actual
        )
    }
}

/// Variable store and failure collection owned by the caller.
#[derive(Debug, Clone, Default)]
pub struct TestContext {
    variables: BTreeMap<String, String>,
    failures: Vec<AssertionFailure>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        trace!(%name, %value, "Setting variable");
        self.variables.insert(name, value);
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    pub fn add_failure(&mut self, failure: AssertionFailure) {
        self.failures.push(failure);
    }

    pub fn failures(&self) -> &[AssertionFailure] {
        &self.failures
    }

    /// Replaces every `${name}` placeholder with the variable value.
    pub fn replace_dynamic_content(&self, text: &str) -> Result<String> {
        if !text.contains("${") {
            return Ok(text.to_string());
        }

        let mut missing = None;
        let replaced = get_variable_regex().replace_all(text, |caps: &Captures<'_>| {
            let name = caps[1].trim();
            match self.variable(name) {
                Some(value) => value.to_string(),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(name) => Err(AssertError::ExpressionEvaluation(format!(
                "Unknown variable '{}'",
                name
            ))),
            None => Ok(replaced.into_owned()),
        }
    }
}
