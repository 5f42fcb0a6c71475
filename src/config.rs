use crate::cli::{Cli, OutputFormat};
use crate::error::AssertError;
use crate::namespace::NamespaceContextBuilder;
use crate::schema::{SchemaRegistry, XsdSchemaRepository};
use crate::validation::{XmlValidationContext, XpathValidationContext};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

impl From<ConfigError> for AssertError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io(io) => AssertError::Io(io),
            other => AssertError::Configuration(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub validation: ValidationSettings,
    pub schema: SchemaConfig,
    pub output: OutputConfig,
}

/// Defaults applied to every validation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationSettings {
    /// Collect path mismatches instead of failing
    pub lenient: bool,
    /// Validate received messages against XSD
    pub schema_validation: bool,
    /// Ignore expressions applied to every comparison
    pub ignore: Vec<String>,
    /// Prefix to URI bindings for path queries
    pub namespaces: BTreeMap<String, String>,
}

/// Schema repositories and the compiled-schema cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchemaConfig {
    pub repositories: Vec<RepositoryConfig>,
    /// Maximum number of compiled schemas kept in memory
    pub cache_max_entries: u64,
}

/// A named repository of `.xsd` files or directories
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepositoryConfig {
    pub name: String,
    pub locations: Vec<PathBuf>,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormatConfig,
    pub verbose: bool,
    /// Quiet mode (errors only)
    pub quiet: bool,
}

/// Output format configuration (serializable version of CLI OutputFormat)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormatConfig {
    #[default]
    Human,
    Json,
}

impl From<OutputFormat> for OutputFormatConfig {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => OutputFormatConfig::Human,
            OutputFormat::Json => OutputFormatConfig::Json,
        }
    }
}

impl From<OutputFormatConfig> for OutputFormat {
    fn from(format: OutputFormatConfig) -> Self {
        match format {
            OutputFormatConfig::Human => OutputFormat::Human,
            OutputFormatConfig::Json => OutputFormat::Json,
        }
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            lenient: false,
            schema_validation: true,
            ignore: vec![],
            namespaces: BTreeMap::new(),
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            repositories: vec![],
            cache_max_entries: 100,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormatConfig::Human,
            verbose: false,
            quiet: false,
        }
    }
}

impl Config {
    /// Namespace builder seeded with the configured default bindings.
    pub fn namespace_builder(&self) -> NamespaceContextBuilder {
        NamespaceContextBuilder::with_default_mappings(self.validation.namespaces.clone())
    }

    /// Tree-comparison settings carrying the configured ignore rules and namespaces.
    pub fn xml_validation_context(&self) -> crate::error::Result<XmlValidationContext> {
        let context = self
            .validation
            .namespaces
            .iter()
            .fold(XmlValidationContext::new(), |ctx, (prefix, uri)| {
                ctx.with_namespace(prefix.clone(), uri.clone())
            })
            .with_schema_validation(self.validation.schema_validation);
        context.with_ignore_expressions(&self.validation.ignore)
    }

    /// Path-validation settings with the configured ignore rules and namespaces.
    pub fn xpath_validation_context(&self) -> crate::error::Result<XpathValidationContext> {
        let context = self
            .validation
            .namespaces
            .iter()
            .fold(XpathValidationContext::new(), |ctx, (prefix, uri)| {
                ctx.with_namespace(prefix.clone(), uri.clone())
            });
        context.with_ignore_expressions(&self.validation.ignore)
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(&SystemEnvProvider, cli).await
    }

    pub async fn load_config_with(env: &impl EnvProvider, cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides_with(env, config)?;

        // CLI arguments have the highest precedence
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let mut directories = vec![PathBuf::from(".")];
        if let Some(config_dir) = dirs::config_dir() {
            directories.push(config_dir.join("xml-assert"));
        }
        Self::find_config_file_in(&directories).await
    }

    /// First configuration file found in `directories`, in order.
    pub async fn find_config_file_in(directories: &[PathBuf]) -> Result<Option<Config>> {
        let config_names = [
            "xml-assert.toml",
            "xml-assert.json",
            ".xml-assert.toml",
            ".xml-assert.json",
        ];

        for directory in directories {
            for name in &config_names {
                let path = directory.join(name);
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(lenient) = env.get("XML_ASSERT_LENIENT") {
            config.validation.lenient = parse_env("XML_ASSERT_LENIENT", &lenient)?;
        }

        if let Some(enabled) = env.get("XML_ASSERT_SCHEMA_VALIDATION") {
            config.validation.schema_validation =
                parse_env("XML_ASSERT_SCHEMA_VALIDATION", &enabled)?;
        }

        if let Some(ignore) = env.get("XML_ASSERT_IGNORE") {
            config.validation.ignore.extend(
                ignore
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            );
        }

        if let Some(entries) = env.get("XML_ASSERT_CACHE_MAX_ENTRIES") {
            config.schema.cache_max_entries = parse_env("XML_ASSERT_CACHE_MAX_ENTRIES", &entries)?;
        }

        if let Some(verbose) = env.get("XML_ASSERT_VERBOSE") {
            config.output.verbose = parse_env("XML_ASSERT_VERBOSE", &verbose)?;
        }

        if let Some(quiet) = env.get("XML_ASSERT_QUIET") {
            config.output.quiet = parse_env("XML_ASSERT_QUIET", &quiet)?;
        }

        if let Some(format) = env.get("XML_ASSERT_FORMAT") {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormatConfig::Human,
                "json" => OutputFormatConfig::Json,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid XML_ASSERT_FORMAT value: {}",
                        format
                    )));
                }
            };
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if cli.lenient {
            config.validation.lenient = true;
        }
        if cli.no_schema_validation {
            config.validation.schema_validation = false;
        }
        config.validation.ignore.extend(cli.ignore.iter().cloned());
        config
            .validation
            .namespaces
            .extend(cli.namespaces.iter().cloned());

        if !cli.schemas.is_empty() {
            config.schema.repositories.push(RepositoryConfig {
                name: "command-line".to_string(),
                locations: cli.schemas.clone(),
            });
        }

        if let Some(format) = cli.format {
            config.output.format = format.into();
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
        } else if cli.verbose || cli.debug {
            config.output.verbose = true;
            config.output.quiet = false;
        }

        config
    }

    /// Merge two configurations (second takes precedence)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        base.validation.lenient = override_config.validation.lenient;
        base.validation.schema_validation = override_config.validation.schema_validation;
        base.validation.ignore.extend(override_config.validation.ignore);
        base.validation
            .namespaces
            .extend(override_config.validation.namespaces);

        if !override_config.schema.repositories.is_empty() {
            base.schema.repositories = override_config.schema.repositories;
        }
        base.schema.cache_max_entries = override_config.schema.cache_max_entries;

        base.output = override_config.output;

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        if config.schema.cache_max_entries == 0 {
            return Err(ConfigError::Validation(
                "Schema cache size must be greater than 0".to_string(),
            ));
        }

        for repository in &config.schema.repositories {
            if repository.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Schema repository name must not be empty".to_string(),
                ));
            }
            if repository.locations.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Schema repository '{}' has no locations",
                    repository.name
                )));
            }
        }

        for (prefix, uri) in &config.validation.namespaces {
            if prefix.is_empty() || uri.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Invalid namespace binding '{}={}'",
                    prefix, uri
                )));
            }
        }

        Ok(())
    }

    /// Loads every configured repository into a registry sized by the cache setting.
    pub async fn build_schema_registry(config: &Config) -> crate::error::Result<SchemaRegistry> {
        let mut registry = SchemaRegistry::with_cache_capacity(config.schema.cache_max_entries);
        for repository in &config.schema.repositories {
            let loaded = XsdSchemaRepository::load(&repository.name, &repository.locations).await?;
            registry.add_repository(Arc::new(loaded));
        }
        Ok(registry)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Mock environment variable provider for testing
    #[derive(Default)]
    struct MockEnvProvider {
        vars: HashMap<String, String>,
    }

    impl MockEnvProvider {
        fn new() -> Self {
            Self {
                vars: HashMap::new(),
            }
        }

        fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
            self.vars.insert(key.into(), value.into());
        }
    }

    impl EnvProvider for MockEnvProvider {
        fn get(&self, key: &str) -> Option<String> {
            self.vars.get(key).cloned()
        }
    }

    fn cli(args: &[&str]) -> Cli {
        let mut all = vec!["xml-assert", "received.xml"];
        all.extend_from_slice(args);
        Cli::try_parse_from(all).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(!config.validation.lenient);
        assert!(config.validation.schema_validation);
        assert!(config.validation.ignore.is_empty());
        assert!(config.validation.namespaces.is_empty());

        assert!(config.schema.repositories.is_empty());
        assert_eq!(config.schema.cache_max_entries, 100);

        assert_eq!(config.output.format, OutputFormatConfig::Human);
        assert!(!config.output.verbose);
        assert!(!config.output.quiet);
    }

    #[tokio::test]
    async fn test_load_toml_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let toml_content = r#"
[validation]
lenient = true
schema_validation = false
ignore = ["root.timestamp", "//ns:id"]

[validation.namespaces]
ns = "urn:orders"

[schema]
cache_max_entries = 8

[[schema.repositories]]
name = "orders"
locations = ["schemas/orders.xsd", "schemas/common"]

[output]
format = "json"
verbose = true
"#;

        fs::write(&config_path, toml_content).unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();

        assert!(config.validation.lenient);
        assert!(!config.validation.schema_validation);
        assert_eq!(config.validation.ignore, vec!["root.timestamp", "//ns:id"]);
        assert_eq!(
            config.validation.namespaces.get("ns").map(String::as_str),
            Some("urn:orders")
        );

        assert_eq!(config.schema.cache_max_entries, 8);
        assert_eq!(config.schema.repositories.len(), 1);
        assert_eq!(config.schema.repositories[0].name, "orders");
        assert_eq!(
            config.schema.repositories[0].locations,
            vec![
                PathBuf::from("schemas/orders.xsd"),
                PathBuf::from("schemas/common")
            ]
        );

        assert_eq!(config.output.format, OutputFormatConfig::Json);
        assert!(config.output.verbose);
        assert!(!config.output.quiet);
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let json_content = r#"{
  "validation": { "lenient": true, "namespaces": { "a": "urn:a" } },
  "output": { "format": "json", "quiet": true }
}"#;

        fs::write(&config_path, json_content).unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();

        assert!(config.validation.lenient);
        assert!(config.validation.schema_validation);
        assert_eq!(config.schema.cache_max_entries, 100);
        assert_eq!(config.output.format, OutputFormatConfig::Json);
        assert!(config.output.quiet);
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "validation: {}").unwrap();

        let result = ConfigManager::load_from_file(&config_path).await;
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(ext)) if ext == "yaml"));
    }

    #[tokio::test]
    async fn test_find_config_file_in_directories() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(
            second.path().join("xml-assert.toml"),
            "[validation]\nlenient = true\n",
        )
        .unwrap();

        let found = ConfigManager::find_config_file_in(&[
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ])
        .await
        .unwrap();
        assert!(found.unwrap().validation.lenient);

        let none = ConfigManager::find_config_file_in(&[first.path().to_path_buf()])
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let mut env = MockEnvProvider::new();
        env.set("XML_ASSERT_LENIENT", "true");
        env.set("XML_ASSERT_SCHEMA_VALIDATION", "false");
        env.set("XML_ASSERT_IGNORE", "root.a, //b ,");
        env.set("XML_ASSERT_CACHE_MAX_ENTRIES", "5");
        env.set("XML_ASSERT_FORMAT", "JSON");
        env.set("XML_ASSERT_QUIET", "true");

        let config =
            ConfigManager::apply_environment_overrides_with(&env, Config::default()).unwrap();

        assert!(config.validation.lenient);
        assert!(!config.validation.schema_validation);
        assert_eq!(config.validation.ignore, vec!["root.a", "//b"]);
        assert_eq!(config.schema.cache_max_entries, 5);
        assert_eq!(config.output.format, OutputFormatConfig::Json);
        assert!(config.output.quiet);
    }

    #[test]
    fn test_invalid_environment_values() {
        let mut env = MockEnvProvider::new();
        env.set("XML_ASSERT_CACHE_MAX_ENTRIES", "many");
        let err = ConfigManager::apply_environment_overrides_with(&env, Config::default())
            .unwrap_err();
        assert!(err.to_string().contains("XML_ASSERT_CACHE_MAX_ENTRIES"));

        let mut env = MockEnvProvider::new();
        env.set("XML_ASSERT_FORMAT", "summary");
        assert!(matches!(
            ConfigManager::apply_environment_overrides_with(&env, Config::default()),
            Err(ConfigError::Environment(_))
        ));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Config::default();
        config.output.quiet = true;
        config.validation.ignore.push("root.a".to_string());

        let cli = cli(&[
            "--lenient",
            "--no-schema-validation",
            "--ignore",
            "root.b",
            "-n",
            "p=urn:p",
            "--schema",
            "orders.xsd",
            "--format",
            "json",
            "--verbose",
        ]);
        let merged = ConfigManager::merge_with_cli(config, &cli);

        assert!(merged.validation.lenient);
        assert!(!merged.validation.schema_validation);
        assert_eq!(merged.validation.ignore, vec!["root.a", "root.b"]);
        assert_eq!(
            merged.validation.namespaces.get("p").map(String::as_str),
            Some("urn:p")
        );
        assert_eq!(merged.schema.repositories[0].locations, vec![PathBuf::from("orders.xsd")]);
        assert_eq!(merged.output.format, OutputFormatConfig::Json);
        assert!(merged.output.verbose);
        assert!(!merged.output.quiet);
        ConfigManager::validate_config(&merged).unwrap();
    }

    #[tokio::test]
    async fn test_precedence_file_env_cli() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("xml-assert.toml");
        fs::write(
            &config_path,
            "[schema]\ncache_max_entries = 10\n[output]\nformat = \"json\"\n",
        )
        .unwrap();

        let mut env = MockEnvProvider::new();
        env.set("XML_ASSERT_CACHE_MAX_ENTRIES", "20");
        env.set("XML_ASSERT_FORMAT", "json");

        let path = config_path.to_string_lossy().to_string();
        let cli = cli(&["--config", path.as_str(), "--format", "human"]);
        let config = ConfigManager::load_config_with(&env, &cli).await.unwrap();

        assert_eq!(config.schema.cache_max_entries, 20);
        assert_eq!(config.output.format, OutputFormatConfig::Human);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(ConfigManager::validate_config(&config).is_ok());

        config.output.verbose = true;
        config.output.quiet = true;
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.schema.cache_max_entries = 0;
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.schema.repositories.push(RepositoryConfig {
            name: "empty".to_string(),
            locations: vec![],
        });
        let err = ConfigManager::validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("'empty' has no locations"));

        let mut config = Config::default();
        config
            .validation
            .namespaces
            .insert("ns".to_string(), String::new());
        assert!(ConfigManager::validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_contexts_from_config() {
        let mut config = Config::default();
        config.validation.schema_validation = false;
        config.validation.ignore = vec!["root.a".to_string()];
        config
            .validation
            .namespaces
            .insert("ns".to_string(), "urn:ns".to_string());

        let xml = config.xml_validation_context().unwrap();
        assert!(!xml.is_schema_validation_enabled());
        assert!(!xml.ignore().is_empty());
        assert_eq!(xml.namespaces().get("ns").map(String::as_str), Some("urn:ns"));

        let xpath = config.xpath_validation_context().unwrap();
        assert!(xpath.is_empty());
        assert!(!xpath.ignore().is_empty());

        assert_eq!(
            config.namespace_builder().default_mappings().get("ns").map(String::as_str),
            Some("urn:ns")
        );
    }

    #[test]
    fn test_config_error_conversion() {
        let err: AssertError = ConfigError::Validation("bad".to_string()).into();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("bad"));
    }

    #[tokio::test]
    async fn test_build_schema_registry_missing_location() {
        let mut config = Config::default();
        config.schema.repositories.push(RepositoryConfig {
            name: "missing".to_string(),
            locations: vec![PathBuf::from("/nonexistent/schema.xsd")],
        });
        let err = ConfigManager::build_schema_registry(&config).await.unwrap_err();
        assert!(err.is_configuration());
    }
}
