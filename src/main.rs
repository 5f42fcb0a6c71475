use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use xml_assert::cli::{Cli, VerbosityLevel};
use xml_assert::config::{Config, ConfigManager};
use xml_assert::context::TestContext;
use xml_assert::error::AssertError;
use xml_assert::extractor::XpathPayloadVariableExtractor;
use xml_assert::message::Message;
use xml_assert::output::{Outcome, Output, Report};
use xml_assert::validation::{XmlValidationContext, XpathValidationContext};
use xml_assert::validator::DomXmlValidator;
use xml_assert::xpath_validator::XpathMessageValidator;

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbosity());

    match run(&cli).await {
        Ok((report, output)) => {
            print!("{}", output.format_report(&report));
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FAILURE)
            }
        }
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(EXIT_USAGE)
        }
    }
}

/// `RUST_LOG` wins over the level derived from the command line.
fn init_tracing(verbosity: VerbosityLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Usage, configuration and I/O problems are returned as errors; assertion
/// failures end up in the report.
async fn run(cli: &Cli) -> Result<(Report, Output)> {
    cli.validate().map_err(anyhow::Error::msg)?;

    let config = ConfigManager::load_config(cli)
        .await
        .context("Failed to load configuration")?;
    debug!(?config, "Effective configuration");

    let output = Output::new(output_verbosity(cli, &config), config.output.format.into());

    let plan = Plan::build(cli, &config).context("Invalid assertion arguments")?;
    let received = read_message(&cli.received).await?;
    let control = match &cli.control {
        Some(path) => Some(read_message(path).await?),
        None => None,
    };
    let mut context = TestContext::new();

    let outcome = match plan.execute(&received, control.as_ref(), &mut context).await {
        Ok(()) => Outcome::Success,
        Err(err) if is_usage_error(&err) => return Err(err.into()),
        Err(err) => Outcome::from_error(&err),
    };

    let report = Report::new(cli.received.display().to_string(), outcome, &context);
    Ok((report, output))
}

/// Validators built up front so malformed expressions are reported as usage errors.
struct Plan<'a> {
    config: &'a Config,
    validation: XmlValidationContext,
    xpath: Option<(XpathMessageValidator, XpathValidationContext)>,
    extractor: Option<XpathPayloadVariableExtractor>,
}

impl<'a> Plan<'a> {
    fn build(cli: &Cli, config: &'a Config) -> xml_assert::Result<Self> {
        let validation = config.xml_validation_context()?;

        let xpath = if cli.xpath.is_empty() {
            None
        } else {
            let context = cli
                .xpath
                .iter()
                .try_fold(config.xpath_validation_context()?, |ctx, (expr, value)| {
                    ctx.with_expression(expr, value.as_str())
                })?;
            let validator = XpathMessageValidator::new(config.validation.lenient)
                .with_namespace_builder(config.namespace_builder());
            Some((validator, context))
        };

        let extractor = if cli.extract.is_empty() {
            None
        } else {
            Some(cli.extract.iter().try_fold(
                XpathPayloadVariableExtractor::new(config.validation.lenient)
                    .with_namespace_builder(config.namespace_builder()),
                |extractor, (expr, variable)| extractor.with_expression(expr, variable.clone()),
            )?)
        };

        Ok(Self {
            config,
            validation,
            xpath,
            extractor,
        })
    }

    async fn execute(
        &self,
        received: &Message,
        control: Option<&Message>,
        context: &mut TestContext,
    ) -> xml_assert::Result<()> {
        if let Some(control) = control {
            let registry = ConfigManager::build_schema_registry(self.config).await?;
            DomXmlValidator::new()
                .with_schema_registry(Arc::new(registry))
                .with_namespace_builder(self.config.namespace_builder())
                .validate(received, control, &self.validation, context)?;
        }

        if let Some((validator, validation)) = &self.xpath {
            validator.validate(received, validation, context)?;
            info!(
                expressions = validation.expressions().len(),
                "XPath validation finished"
            );
        }

        if let Some(extractor) = &self.extractor {
            extractor.extract(received, context)?;
        }

        Ok(())
    }
}

async fn read_message(path: &Path) -> Result<Message> {
    let payload = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Message::new(payload))
}

fn output_verbosity(cli: &Cli, config: &Config) -> VerbosityLevel {
    if config.output.quiet {
        VerbosityLevel::Quiet
    } else if cli.debug {
        VerbosityLevel::Debug
    } else if config.output.verbose {
        VerbosityLevel::Verbose
    } else {
        VerbosityLevel::Normal
    }
}

fn is_usage_error(err: &AssertError) -> bool {
    matches!(err, AssertError::Configuration(_) | AssertError::Io(_))
}
