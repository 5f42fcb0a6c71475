//! # xml-assert Library
//!
//! Assertions over XML messages: XSD schema validation, structural comparison
//! of a received document against a control document, XPath and dot-path
//! validation, and extraction of payload values into test variables.

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod expression;
pub mod extractor;
pub mod ignore;
#[cfg(feature = "libxml2")]
pub mod libxml2;
pub mod matcher;
pub mod message;
pub mod namespace;
pub mod output;
pub mod schema;
pub mod validation;
pub mod validator;
pub mod xpath;
pub mod xpath_validator;

pub use cache::CompiledSchemaCache;
pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use config::{Config, ConfigError, ConfigManager};
pub use context::{AssertionFailure, TestContext};
pub use document::{NodeKind, XmlDocument, XmlNode};
pub use error::{AssertError, LibXml2Error, Result};
pub use expression::{PathExpression, PathExpressionResult, ResultType};
pub use extractor::XpathPayloadVariableExtractor;
pub use ignore::{DocumentIgnoreRules, IgnoreRule, IgnoreRules};
#[cfg(feature = "libxml2")]
pub use libxml2::{LibXml2Wrapper, ValidationResult, XmlSchemaPtr};
pub use matcher::{DefaultMatcherResolver, MatcherResolver};
pub use message::{Message, Payload};
pub use namespace::{NamespaceContext, NamespaceContextBuilder};
pub use output::{Outcome, Output, Report};
pub use schema::{
    SchemaCollection, SchemaRegistry, SchemaRepository, SchemaSerializer, SchemaSet,
    SchemaSource, XsdSchemaRepository,
};
pub use validation::{ExpectedValue, XmlValidationContext, XpathValidationContext};
pub use validator::DomXmlValidator;
pub use xpath::{CompiledXPath, XPathValue};
pub use xpath_validator::XpathMessageValidator;
