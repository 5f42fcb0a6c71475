use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only the outcome line on failure
    Quiet,
    /// Outcome, extracted variables and lenient failures
    #[default]
    Normal,
    /// Also logs validation progress
    Verbose,
    /// Logs every compared node and expression
    Debug,
}

impl VerbosityLevel {
    /// Default `tracing` filter directive for this level, used when `RUST_LOG` is unset.
    pub fn filter_directive(self) -> &'static str {
        match self {
            VerbosityLevel::Quiet => "error",
            VerbosityLevel::Normal => "warn",
            VerbosityLevel::Verbose => "info",
            VerbosityLevel::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

/// Assert the content of an XML message
#[derive(Parser, Debug, Clone)]
#[command(name = "xml-assert")]
#[command(
    about = "Compare an XML message against a control message, check XPath expectations and extract values"
)]
#[command(version)]
pub struct Cli {
    /// Received XML message
    #[arg(help = "File holding the received XML message")]
    pub received: PathBuf,

    /// Control message for schema and structural validation
    #[arg(short = 'c', long = "control")]
    pub control: Option<PathBuf>,

    /// Ignore expression (tag name, dot path or XPath); repeatable
    #[arg(short = 'i', long = "ignore", action = clap::ArgAction::Append)]
    pub ignore: Vec<String>,

    /// Namespace binding PREFIX=URI; repeatable
    #[arg(
        short = 'n',
        long = "namespace",
        value_parser = parse_namespace,
        action = clap::ArgAction::Append
    )]
    pub namespaces: Vec<(String, String)>,

    /// Path expectation EXPR=VALUE; repeatable
    #[arg(
        short = 'x',
        long = "xpath",
        value_parser = parse_assignment,
        action = clap::ArgAction::Append
    )]
    pub xpath: Vec<(String, String)>,

    /// Extraction EXPR=VARIABLE; repeatable
    #[arg(
        short = 'e',
        long = "extract",
        value_parser = parse_assignment,
        action = clap::ArgAction::Append
    )]
    pub extract: Vec<(String, String)>,

    /// XSD file or directory used for schema validation; repeatable
    #[arg(short = 's', long = "schema", action = clap::ArgAction::Append)]
    pub schemas: Vec<PathBuf>,

    /// Collect path mismatches instead of failing on the first one
    #[arg(long = "lenient")]
    pub lenient: bool,

    /// Skip XSD validation of the received message
    #[arg(long = "no-schema-validation")]
    pub no_schema_validation: bool,

    /// Configuration file (TOML or JSON)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with_all = ["verbose", "debug"]
    )]
    pub quiet: bool,

    /// Log every compared node
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.debug {
            VerbosityLevel::Debug
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.received.exists() {
            return Err(format!(
                "Received message does not exist: {}",
                self.received.display()
            ));
        }
        if let Some(control) = &self.control
            && !control.exists()
        {
            return Err(format!(
                "Control message does not exist: {}",
                control.display()
            ));
        }
        if self.control.is_none() && self.xpath.is_empty() && self.extract.is_empty() {
            return Err("Nothing to do: give --control, --xpath or --extract".to_string());
        }
        Ok(())
    }
}

fn parse_namespace(arg: &str) -> Result<(String, String), String> {
    let (prefix, uri) = arg
        .split_once('=')
        .ok_or_else(|| format!("Invalid namespace '{}', expected PREFIX=URI", arg))?;
    if prefix.is_empty() || uri.is_empty() {
        return Err(format!("Invalid namespace '{}', expected PREFIX=URI", arg));
    }
    Ok((prefix.to_string(), uri.to_string()))
}

/// Splits `EXPR=VALUE` at the last `=` outside brackets, parentheses and quotes,
/// so predicates such as `//a[@id='1']=x` keep their own `=`.
fn parse_assignment(arg: &str) -> Result<(String, String), String> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut split = None;

    for (index, c) in arg.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth = depth.saturating_sub(1),
            (None, '=') if depth == 0 => split = Some(index),
            _ => {}
        }
    }

    match split {
        Some(index) if index > 0 => Ok((arg[..index].to_string(), arg[index + 1..].to_string())),
        _ => Err(format!("Invalid assignment '{}', expected EXPR=VALUE", arg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_basic_cli_parsing() {
        let args = vec!["xml-assert", "received.xml", "--control", "control.xml"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.received, PathBuf::from("received.xml"));
        assert_eq!(cli.control, Some(PathBuf::from("control.xml")));
        assert_eq!(cli.verbosity(), VerbosityLevel::Normal);
        assert!(cli.format.is_none());
    }

    #[test]
    fn test_repeatable_arguments() {
        let cli = Cli::try_parse_from([
            "xml-assert",
            "in.xml",
            "--xpath",
            "//a[@id='1']/b=value",
            "--xpath",
            "count(//item)=2",
            "--extract",
            "root.element=var",
            "--namespace",
            "ns=urn:a",
            "--ignore",
            "root.b",
            "--ignore",
            "c",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(
            cli.xpath,
            vec![
                ("//a[@id='1']/b".to_string(), "value".to_string()),
                ("count(//item)".to_string(), "2".to_string()),
            ]
        );
        assert_eq!(cli.extract, vec![("root.element".to_string(), "var".to_string())]);
        assert_eq!(cli.namespaces, vec![("ns".to_string(), "urn:a".to_string())]);
        assert_eq!(cli.ignore, vec!["root.b", "c"]);
        assert_eq!(cli.format, Some(OutputFormat::Json));
    }

    #[test]
    fn test_assignment_with_empty_value() {
        assert_eq!(
            parse_assignment("//empty=").unwrap(),
            ("//empty".to_string(), String::new())
        );
        assert!(parse_assignment("=x").is_err());
        assert!(parse_assignment("//a[@x='=']").is_err());
    }

    #[test]
    fn test_invalid_namespace() {
        assert!(parse_namespace("nouri").is_err());
        assert!(parse_namespace("=urn:a").is_err());
        assert!(Cli::try_parse_from(["xml-assert", "in.xml", "-n", "bad"]).is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["xml-assert", "in.xml", "-q", "-v"]).is_err());
        let cli = Cli::try_parse_from(["xml-assert", "in.xml", "--debug"]).unwrap();
        assert_eq!(cli.verbosity(), VerbosityLevel::Debug);
        assert_eq!(cli.verbosity().filter_directive(), "debug");
    }
}
