//! Output and reporting
//!
//! Renders the outcome of one `xml-assert` run for humans or as JSON.

use std::collections::BTreeMap;
use std::io::IsTerminal;

use serde::Serialize;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::context::{AssertionFailure, TestContext};
use crate::error::AssertError;

/// Final status of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure {
        kind: String,
        message: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        schema_errors: Vec<String>,
    },
}

impl Outcome {
    pub fn from_error(err: &AssertError) -> Self {
        let schema_errors = match err {
            AssertError::SchemaValidation { errors, .. } => errors.clone(),
            _ => vec![],
        };
        Outcome::Failure {
            kind: error_kind(err).to_string(),
            message: err.to_string(),
            schema_errors,
        }
    }
}

/// Everything the binary prints about one received message.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub received: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub variables: BTreeMap<String, String>,
    pub failures: Vec<AssertionFailure>,
}

impl Report {
    pub fn new(received: impl Into<String>, outcome: Outcome, context: &TestContext) -> Self {
        Self {
            received: received.into(),
            outcome,
            variables: context.variables().clone(),
            failures: context.failures().to_vec(),
        }
    }

    /// Lenient failures count as a failed run even when no error was raised.
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success && self.failures.is_empty()
    }
}

fn error_kind(err: &AssertError) -> &'static str {
    match err {
        AssertError::SchemaValidation { .. } => "schema-validation",
        AssertError::StructuralMismatch(_) => "structural-mismatch",
        AssertError::UnknownElement(_) => "unknown-element",
        AssertError::ExpressionEvaluation(_) => "expression-evaluation",
        AssertError::Configuration(_) => "configuration",
        AssertError::XmlParse(_) => "xml-parse",
        AssertError::Io(_) => "io",
        AssertError::Internal(_) | AssertError::LibXml2Internal { .. } => "internal",
    }
}

/// Output formatter for reports
pub struct Output {
    verbosity: VerbosityLevel,
    format: OutputFormat,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel, format: OutputFormat) -> Self {
        Self {
            verbosity,
            format,
            show_colors: std::io::stdout().is_terminal(),
        }
    }

    pub fn without_colors(mut self) -> Self {
        self.show_colors = false;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_report(&self, report: &Report) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report)
                .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e)),
            OutputFormat::Human => self.format_human(report),
        }
    }

    fn format_human(&self, report: &Report) -> String {
        let mut output = String::new();

        if self.verbosity == VerbosityLevel::Quiet {
            if !report.is_success() {
                output.push_str(&self.format_outcome(report));
                output.push('\n');
            }
            return output;
        }

        for (name, value) in &report.variables {
            output.push_str(&format!("{} = {}\n", name, value));
        }

        for failure in &report.failures {
            output.push_str(&format!("{}  {}\n", self.colorize("✗", "31"), failure));
        }

        output.push_str(&self.format_outcome(report));
        output.push('\n');

        if self.verbosity >= VerbosityLevel::Verbose
            && let Outcome::Failure { schema_errors, .. } = &report.outcome
        {
            for error in schema_errors.iter().skip(1) {
                output.push_str(&format!("    {}\n", error));
            }
        }

        output
    }

    fn format_outcome(&self, report: &Report) -> String {
        match &report.outcome {
            Outcome::Success if report.failures.is_empty() => format!(
                "{}  {}",
                self.colorize("✓ OK", "32"),
                report.received
            ),
            Outcome::Success => format!(
                "{}  {} - {} assertion failure{}",
                self.colorize("✗ FAILED", "31"),
                report.received,
                report.failures.len(),
                if report.failures.len() == 1 { "" } else { "s" }
            ),
            Outcome::Failure { kind, message, .. } => format!(
                "{}  {} ({}) - {}",
                self.colorize("✗ FAILED", "31"),
                report.received,
                kind,
                message
            ),
        }
    }
}
