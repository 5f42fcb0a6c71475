//! Matcher expressions: `@name(arg, ...)@` placeholders that validate a value
//! instead of requiring exact equality.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::context::TestContext;
use crate::error::{AssertError, Result};

/// Control value that accepts any received value.
pub const IGNORE_PLACEHOLDER: &str = "@ignore@";

const MATCHER_DELIMITER: char = '@';

static MATCHER_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_matcher_regex() -> &'static Regex {
    MATCHER_REGEX.get_or_init(|| {
        Regex::new(r"^@([A-Za-z][A-Za-z0-9_-]*)(?:\((.*)\))?@$")
            .expect("Failed to compile matcher expression regex")
    })
}

/// True for the ignore placeholder, surrounding whitespace allowed.
pub fn is_ignore_placeholder(value: &str) -> bool {
    value.trim() == IGNORE_PLACEHOLDER
}

/// Validates received values against matcher expressions.
#[cfg_attr(test, mockall::automock)]
pub trait MatcherResolver: Send + Sync {
    fn is_matcher_expression(&self, expression: &str) -> bool;

    /// Fails with a mismatch error if `actual` does not satisfy `control_expression`.
    fn resolve(
        &self,
        field: &str,
        actual: &str,
        control_expression: &str,
        context: &TestContext,
    ) -> Result<()>;
}

/// Resolver with the built-in matcher library.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMatcherResolver;

impl DefaultMatcherResolver {
    pub fn new() -> Self {
        Self
    }
}

impl MatcherResolver for DefaultMatcherResolver {
    fn is_matcher_expression(&self, expression: &str) -> bool {
        let expression = expression.trim();
        expression.len() > 2
            && expression.starts_with(MATCHER_DELIMITER)
            && expression.ends_with(MATCHER_DELIMITER)
    }

    fn resolve(
        &self,
        field: &str,
        actual: &str,
        control_expression: &str,
        context: &TestContext,
    ) -> Result<()> {
        let expression = control_expression.trim();
        let caps = get_matcher_regex().captures(expression).ok_or_else(|| {
            AssertError::Configuration(format!("Invalid matcher expression '{}'", expression))
        })?;

        let name = &caps[1];
        let mut args = Vec::new();
        if let Some(raw) = caps.get(2) {
            for arg in split_arguments(raw.as_str()) {
                args.push(context.replace_dynamic_content(&arg)?);
            }
        }

        debug!(%field, matcher = name, ?args, "Resolving matcher expression");
        let matcher = Matcher::from_name(name)?;
        matcher.validate(field, actual, &args)
    }
}

/// Splits `a, 'b,c', d` into trimmed arguments with quotes removed.
fn split_arguments(raw: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in raw.chars() {
        match c {
            '\'' => quoted = !quoted,
            ',' if !quoted => args.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    args.push(current);

    let args: Vec<String> = args.into_iter().map(|a| a.trim().to_string()).collect();
    if args.len() == 1 && args[0].is_empty() && !raw.contains('\'') {
        Vec::new()
    } else {
        args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Matcher {
    Ignore,
    EqualsIgnoreCase,
    Contains,
    ContainsIgnoreCase,
    StartsWith,
    EndsWith,
    Matches,
    IsNumber,
    GreaterThan,
    LowerThan,
    IsEmpty,
    NotEmpty,
    Trim,
    StringLength,
}

impl Matcher {
    fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "ignore" => Matcher::Ignore,
            "equalsIgnoreCase" => Matcher::EqualsIgnoreCase,
            "contains" => Matcher::Contains,
            "containsIgnoreCase" => Matcher::ContainsIgnoreCase,
            "startsWith" => Matcher::StartsWith,
            "endsWith" => Matcher::EndsWith,
            "matches" => Matcher::Matches,
            "isNumber" => Matcher::IsNumber,
            "greaterThan" => Matcher::GreaterThan,
            "lowerThan" => Matcher::LowerThan,
            "isEmpty" => Matcher::IsEmpty,
            "notEmpty" => Matcher::NotEmpty,
            "trim" => Matcher::Trim,
            "stringLength" => Matcher::StringLength,
            other => {
                return Err(AssertError::Configuration(format!(
                    "Unknown matcher '{}'",
                    other
                )));
            }
        })
    }

    fn name(self) -> &'static str {
        match self {
            Matcher::Ignore => "ignore",
            Matcher::EqualsIgnoreCase => "equalsIgnoreCase",
            Matcher::Contains => "contains",
            Matcher::ContainsIgnoreCase => "containsIgnoreCase",
            Matcher::StartsWith => "startsWith",
            Matcher::EndsWith => "endsWith",
            Matcher::Matches => "matches",
            Matcher::IsNumber => "isNumber",
            Matcher::GreaterThan => "greaterThan",
            Matcher::LowerThan => "lowerThan",
            Matcher::IsEmpty => "isEmpty",
            Matcher::NotEmpty => "notEmpty",
            Matcher::Trim => "trim",
            Matcher::StringLength => "stringLength",
        }
    }

    fn validate(self, field: &str, actual: &str, args: &[String]) -> Result<()> {
        let control = args.first().map(String::as_str).unwrap_or_default();
        let passed = match self {
            Matcher::Ignore => true,
            Matcher::EqualsIgnoreCase => actual.to_lowercase() == control.to_lowercase(),
            Matcher::Contains => actual.contains(self.required(control, args)?),
            Matcher::ContainsIgnoreCase => actual
                .to_lowercase()
                .contains(&self.required(control, args)?.to_lowercase()),
            Matcher::StartsWith => actual.starts_with(self.required(control, args)?),
            Matcher::EndsWith => actual.ends_with(self.required(control, args)?),
            Matcher::Matches => {
                let pattern = Regex::new(&format!("^(?:{})$", self.required(control, args)?))
                    .map_err(|e| {
                        AssertError::Configuration(format!(
                            "Invalid pattern for matcher '{}': {}",
                            self.name(),
                            e
                        ))
                    })?;
                pattern.is_match(actual)
            }
            Matcher::IsNumber => actual.trim().parse::<f64>().is_ok(),
            Matcher::GreaterThan => self.number(actual)? > self.number(self.required(control, args)?)?,
            Matcher::LowerThan => self.number(actual)? < self.number(self.required(control, args)?)?,
            Matcher::IsEmpty => actual.is_empty(),
            Matcher::NotEmpty => !actual.is_empty(),
            Matcher::Trim => actual.trim().eq_ignore_ascii_case(control.trim()),
            Matcher::StringLength => {
                let expected: usize = self.required(control, args)?.parse().map_err(|_| {
                    AssertError::Configuration(format!(
                        "Matcher '{}' expects a numeric length, got '{}'",
                        self.name(),
                        control
                    ))
                })?;
                actual.chars().count() == expected
            }
        };

        if passed {
            Ok(())
        } else {
            Err(AssertError::StructuralMismatch(format!(
                "Matcher '{}' failed for field '{}'. Received value is '{}', control value is '{}'.",
                self.name(),
                field,
                actual,
                control
            )))
        }
    }

    fn required<'s>(self, control: &'s str, args: &[String]) -> Result<&'s str> {
        if args.is_empty() {
            return Err(AssertError::Configuration(format!(
                "Matcher '{}' requires a control argument",
                self.name()
            )));
        }
        Ok(control)
    }

    fn number(self, value: &str) -> Result<f64> {
        value.trim().parse::<f64>().map_err(|_| {
            AssertError::StructuralMismatch(format!(
                "Matcher '{}' failed: '{}' is not a number",
                self.name(),
                value
            ))
        })
    }
}
