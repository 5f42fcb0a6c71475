//! Schema repositories and XSD validation of received payloads.
//!
//! A [`SchemaRegistry`] owns the repositories a validator may choose from, the
//! named schemas that can be referenced directly, the compiled-schema cache and
//! the serializer that turns inline schema documents into bytes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;
use tracing::{debug, error, info, warn};

#[cfg(feature = "libxml2")]
use crate::cache::CompiledSchemaCache;
use crate::document::XmlDocument;
use crate::error::{AssertError, Result};
#[cfg(feature = "libxml2")]
use crate::libxml2::{LibXml2Wrapper, ValidationResult, XmlSchemaPtr};
use crate::validation::XmlValidationContext;

const DEFAULT_CACHE_CAPACITY: u64 = 100;

const UTF8_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

static TARGET_NAMESPACE_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_target_namespace_regex() -> &'static Regex {
    TARGET_NAMESPACE_REGEX.get_or_init(|| {
        Regex::new(r#"<(?:[\w.-]+:)?schema\b[^>]*?\stargetNamespace\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("Failed to compile targetNamespace regex")
    })
}

/// Target namespace declared on the `schema` root of an XSD, if any.
pub fn extract_target_namespace(content: &str) -> Option<String> {
    let caps = get_target_namespace_regex().captures(content)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
        .filter(|ns| !ns.is_empty())
}

/// A schema as delivered by a repository.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaSource {
    /// Raw XSD bytes, e.g. a file read by a repository
    Resource {
        name: String,
        target_namespace: Option<String>,
        bytes: Arc<[u8]>,
    },
    /// A schema document held as text, serialised on demand
    Inline {
        target_namespace: Option<String>,
        document: String,
    },
}

impl SchemaSource {
    pub fn resource(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let target_namespace = extract_target_namespace(&String::from_utf8_lossy(&bytes));
        SchemaSource::Resource {
            name: name.into(),
            target_namespace,
            bytes,
        }
    }

    /// Parses `document` to make sure it is a schema and reads its target namespace.
    pub fn inline(document: impl Into<String>) -> Result<Self> {
        let document = document.into();
        let parsed = XmlDocument::parse(&document)?;
        let root = parsed
            .root_element()
            .filter(|root| root.local_name() == Some("schema"))
            .ok_or_else(|| {
                AssertError::Configuration(
                    "Inline schema source does not contain a schema element".to_string(),
                )
            })?;
        let target_namespace = root
            .attribute("targetNamespace", None)
            .and_then(|attr| attr.value())
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);

        Ok(SchemaSource::Inline {
            target_namespace,
            document,
        })
    }

    pub fn name(&self) -> String {
        match self {
            SchemaSource::Resource { name, .. } => name.clone(),
            SchemaSource::Inline {
                target_namespace, ..
            } => format!("inline({})", target_namespace.as_deref().unwrap_or("")),
        }
    }

    pub fn target_namespace(&self) -> Option<&str> {
        match self {
            SchemaSource::Resource {
                target_namespace, ..
            }
            | SchemaSource::Inline {
                target_namespace, ..
            } => target_namespace.as_deref(),
        }
    }
}

/// Turns schema sources into byte streams for the validation backend.
///
/// Inline documents are rewritten into a shared output buffer with a UTF-8
/// declaration, so concurrent callers are serialised through a lock.
#[derive(Debug, Default)]
pub struct SchemaSerializer {
    buffer: Mutex<Vec<u8>>,
}

impl SchemaSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serialize(&self, source: &SchemaSource) -> Result<Arc<[u8]>> {
        match source {
            SchemaSource::Resource { bytes, .. } => Ok(Arc::clone(bytes)),
            SchemaSource::Inline { document, .. } => {
                let mut buffer = self.buffer.lock().map_err(|_| {
                    AssertError::Internal("Schema serializer lock was poisoned".to_string())
                })?;
                buffer.clear();
                buffer.extend_from_slice(UTF8_DECLARATION.as_bytes());
                buffer.push(b'\n');
                buffer.extend_from_slice(strip_declaration(document).as_bytes());
                Ok(Arc::from(buffer.as_slice()))
            }
        }
    }
}

/// The text is already UTF-8, so any declared encoding is dropped with the declaration.
fn strip_declaration(document: &str) -> &str {
    let trimmed = document.trim_start();
    match trimmed.strip_prefix("<?xml") {
        Some(rest) if rest.starts_with(char::is_whitespace) => rest
            .split_once("?>")
            .map(|(_, body)| body.trim_start())
            .unwrap_or(trimmed),
        _ => trimmed,
    }
}

/// A named collection of schemas.
#[cfg_attr(test, mockall::automock)]
pub trait SchemaRepository: Send + Sync {
    fn name(&self) -> String;

    fn schemas(&self) -> Vec<SchemaSource>;

    /// True if one of the schemas is able to validate the document's root element.
    fn can_validate(&self, document: &XmlDocument) -> bool;
}

/// Repository of `.xsd` files loaded from disk.
#[derive(Debug, Clone)]
pub struct XsdSchemaRepository {
    name: String,
    schemas: Vec<SchemaSource>,
}

impl XsdSchemaRepository {
    pub fn from_sources(name: impl Into<String>, schemas: Vec<SchemaSource>) -> Self {
        Self {
            name: name.into(),
            schemas,
        }
    }

    /// Loads every location: a file is read as one schema, a directory contributes
    /// its `.xsd` files in name order.
    pub async fn load(name: impl Into<String>, locations: &[PathBuf]) -> Result<Self> {
        let name = name.into();
        let mut schemas = Vec::new();

        for location in locations {
            let metadata = tokio::fs::metadata(location)
                .await
                .map_err(|e| schema_io_error(location, e))?;

            if metadata.is_dir() {
                let mut files = Vec::new();
                let mut entries = tokio::fs::read_dir(location).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("xsd")) {
                        files.push(path);
                    }
                }
                files.sort();
                for file in files {
                    schemas.push(Self::load_file(&file).await?);
                }
            } else {
                schemas.push(Self::load_file(location).await?);
            }
        }

        info!(repository = %name, schemas = schemas.len(), "Loaded schema repository");
        Ok(Self { name, schemas })
    }

    async fn load_file(path: &Path) -> Result<SchemaSource> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| schema_io_error(path, e))?;
        let source = SchemaSource::resource(path.display().to_string(), bytes);
        debug!(
            schema = %path.display(),
            target_namespace = source.target_namespace().unwrap_or(""),
            "Loaded schema"
        );
        Ok(source)
    }
}

fn schema_io_error(path: &Path, err: std::io::Error) -> AssertError {
    match err.kind() {
        std::io::ErrorKind::NotFound => AssertError::Configuration(format!(
            "Schema location not found: {}",
            path.display()
        )),
        _ => AssertError::Io(err),
    }
}

impl SchemaRepository for XsdSchemaRepository {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn schemas(&self) -> Vec<SchemaSource> {
        self.schemas.clone()
    }

    fn can_validate(&self, document: &XmlDocument) -> bool {
        let namespace = document.root_element().and_then(|root| root.namespace());
        self.schemas
            .iter()
            .any(|schema| schema.target_namespace() == namespace)
    }
}

/// Name and namespace of the root element as printed in resolution errors.
fn root_label(document: &XmlDocument) -> String {
    match document.root_element() {
        Some(root) => format!(
            "{}({})",
            root.local_name().unwrap_or_default(),
            root.namespace().unwrap_or_default()
        ),
        None => "()".to_string(),
    }
}

/// Schemas a payload is validated against at once.
///
/// A named schema resolves to a set of one; a repository contributes all of its
/// schemas, so elements from every namespace it covers are known to validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSet {
    origin: String,
    sources: Vec<SchemaSource>,
}

impl SchemaSet {
    pub fn new(origin: impl Into<String>, sources: Vec<SchemaSource>) -> Self {
        Self {
            origin: origin.into(),
            sources,
        }
    }

    /// Schema or repository name the set was resolved from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn sources(&self) -> &[SchemaSource] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn target_namespaces(&self) -> Vec<Option<&str>> {
        self.sources.iter().map(SchemaSource::target_namespace).collect()
    }
}

/// Namespace of the generated document that imports every schema of a set.
pub const COLLECTION_NAMESPACE: &str = "urn:xml-assert:schema-collection";

/// File name of the generated collection document.
pub const COLLECTION_ROOT: &str = "collection.xsd";

/// A schema set laid out as files: each source under a file name, plus the
/// generated documents tying them together. The first document is the root.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaCollection {
    documents: Vec<(String, Arc<[u8]>)>,
}

impl SchemaCollection {
    /// Lays out the serialized sources of `set`.
    ///
    /// The root imports one document per target namespace. A namespace served by
    /// several sources gets a generated document including all of them, since
    /// libxml2 only follows the first import of a namespace.
    pub fn build(set: &SchemaSet, serializer: &SchemaSerializer) -> Result<Self> {
        let mut documents: Vec<(String, Arc<[u8]>)> = Vec::with_capacity(set.len() + 1);
        let mut groups: BTreeMap<Option<&str>, Vec<String>> = BTreeMap::new();

        for (index, source) in set.sources().iter().enumerate() {
            let mut file_name = staged_file_name(source, index);
            if documents.iter().any(|(name, _)| *name == file_name) {
                file_name = format!("{index}-{file_name}");
            }
            groups
                .entry(source.target_namespace())
                .or_default()
                .push(file_name.clone());
            documents.push((file_name, serializer.serialize(source)?));
        }

        let mut root = format!(
            "{UTF8_DECLARATION}\n<xs:schema xmlns:xs=\"http://www.w3.org/2001/XMLSchema\" targetNamespace=\"{COLLECTION_NAMESPACE}\">\n"
        );
        for (group, (namespace, files)) in groups.iter().enumerate() {
            let location = match files.as_slice() {
                [file] => file.clone(),
                _ => {
                    let name = format!("namespace-{group}.xsd");
                    let include = include_document(*namespace, files);
                    documents.push((name.clone(), Arc::from(include.into_bytes())));
                    name
                }
            };
            let namespace_attr = namespace
                .map(|ns| format!(" namespace=\"{}\"", escape_attribute(ns)))
                .unwrap_or_default();
            root.push_str(&format!(
                "    <xs:import{namespace_attr} schemaLocation=\"{}\"/>\n",
                escape_attribute(&location)
            ));
        }
        root.push_str("</xs:schema>\n");
        documents.insert(0, (COLLECTION_ROOT.to_string(), Arc::from(root.into_bytes())));

        Ok(Self { documents })
    }

    /// Root document first, then sources and generated include documents.
    pub fn documents(&self) -> &[(String, Arc<[u8]>)] {
        &self.documents
    }

    pub fn root(&self) -> &[u8] {
        &self.documents[0].1
    }

    /// Key covering every file name and content of the collection.
    pub fn fingerprint(&self) -> Vec<u8> {
        let mut fingerprint = Vec::new();
        for (name, bytes) in &self.documents {
            fingerprint.extend_from_slice(name.as_bytes());
            fingerprint.push(0);
            fingerprint.extend_from_slice(bytes);
            fingerprint.push(0);
        }
        fingerprint
    }

    /// Writes every document into `dir` and returns the root document's path.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        for (name, bytes) in &self.documents {
            std::fs::write(dir.join(name), bytes)?;
        }
        Ok(dir.join(COLLECTION_ROOT))
    }
}

fn include_document(namespace: Option<&str>, files: &[String]) -> String {
    let target = namespace
        .map(|ns| format!(" targetNamespace=\"{}\"", escape_attribute(ns)))
        .unwrap_or_default();
    let includes: String = files
        .iter()
        .map(|file| format!("    <xs:include schemaLocation=\"{}\"/>\n", escape_attribute(file)))
        .collect();
    format!(
        "{UTF8_DECLARATION}\n<xs:schema xmlns:xs=\"http://www.w3.org/2001/XMLSchema\"{target}>\n{includes}</xs:schema>\n"
    )
}

/// Keeps the source's own file name when it is a plain relative reference, so
/// that `schemaLocation`s between sources of one repository still resolve.
fn staged_file_name(source: &SchemaSource, index: usize) -> String {
    let original = match source {
        SchemaSource::Resource { name, .. } => Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string),
        SchemaSource::Inline { .. } => None,
    };
    match original {
        Some(name)
            if name != COLLECTION_ROOT
                && !name.starts_with("namespace-")
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')) =>
        {
            name
        }
        _ => format!("schema-{index}.xsd"),
    }
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}

/// Repositories and named schemas available to schema validation.
pub struct SchemaRegistry {
    repositories: Vec<Arc<dyn SchemaRepository>>,
    schemas: BTreeMap<String, SchemaSource>,
    serializer: SchemaSerializer,
    #[cfg(feature = "libxml2")]
    compiled: CompiledSchemaCache<XmlSchemaPtr>,
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repositories: Vec<String> = self.repositories.iter().map(|r| r.name()).collect();
        f.debug_struct("SchemaRegistry")
            .field("repositories", &repositories)
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_cache_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_capacity(capacity: u64) -> Self {
        #[cfg(not(feature = "libxml2"))]
        let _ = capacity;
        Self {
            repositories: Vec::new(),
            schemas: BTreeMap::new(),
            serializer: SchemaSerializer::new(),
            #[cfg(feature = "libxml2")]
            compiled: CompiledSchemaCache::new(capacity),
        }
    }

    pub fn add_repository(&mut self, repository: Arc<dyn SchemaRepository>) {
        self.repositories.push(repository);
    }

    pub fn with_repository(mut self, repository: Arc<dyn SchemaRepository>) -> Self {
        self.add_repository(repository);
        self
    }

    /// Registers a schema that validation contexts can reference by name.
    pub fn add_schema(&mut self, name: impl Into<String>, schema: SchemaSource) {
        self.schemas.insert(name.into(), schema);
    }

    pub fn repositories(&self) -> &[Arc<dyn SchemaRepository>] {
        &self.repositories
    }

    pub fn repository(&self, name: &str) -> Option<Arc<dyn SchemaRepository>> {
        self.repositories.iter().find(|r| r.name() == name).cloned()
    }

    pub fn schema(&self, name: &str) -> Option<&SchemaSource> {
        self.schemas.get(name)
    }

    pub fn serializer(&self) -> &SchemaSerializer {
        &self.serializer
    }

    /// Picks the schemas for `document`: the explicitly named schema, otherwise
    /// every schema of the explicit repository, the only repository, or the
    /// single repository able to validate the root element. `None` means there
    /// is nothing to validate against.
    pub fn resolve(
        &self,
        document: &XmlDocument,
        context: &XmlValidationContext,
    ) -> Result<Option<SchemaSet>> {
        if let Some(name) = context.schema() {
            return self
                .schema(name)
                .map(|schema| Some(SchemaSet::new(name, vec![schema.clone()])))
                .ok_or_else(|| {
                    AssertError::Configuration(format!("Unable to find XML schema '{}'", name))
                });
        }

        let repository = if let Some(name) = context.schema_repository() {
            self.repository(name).ok_or_else(|| {
                AssertError::Configuration(format!("Unable to find schema repository '{}'", name))
            })?
        } else if self.repositories.len() == 1 {
            Arc::clone(&self.repositories[0])
        } else if !self.repositories.is_empty() {
            let mut capable: Vec<_> = self
                .repositories
                .iter()
                .filter(|r| r.can_validate(document))
                .collect();
            match capable.len() {
                1 => Arc::clone(capable.remove(0)),
                0 => {
                    return Err(AssertError::Configuration(format!(
                        "Failed to find proper schema repository for validating element '{}'",
                        root_label(document)
                    )));
                }
                n => {
                    let names: Vec<String> = capable.iter().map(|r| r.name()).collect();
                    return Err(AssertError::Configuration(format!(
                        "Found {} schema repositories able to validate element '{}': {}",
                        n,
                        root_label(document),
                        names.join(", ")
                    )));
                }
            }
        } else {
            warn!("Neither schema instance nor schema repository defined - skipping XML schema validation");
            return Ok(None);
        };

        let schemas = repository.schemas();
        if schemas.is_empty() || !repository.can_validate(document) {
            return Err(AssertError::Configuration(format!(
                "Unable to find proper XML schema definition for element '{}' in schema repository '{}'",
                root_label(document),
                repository.name()
            )));
        }

        debug!(repository = %repository.name(), schemas = schemas.len(), "Resolved XML schemas");
        Ok(Some(SchemaSet::new(repository.name(), schemas)))
    }

    /// Validates the received payload against the schemas resolved for it.
    pub fn validate(
        &self,
        payload: &str,
        document: &XmlDocument,
        context: &XmlValidationContext,
    ) -> Result<()> {
        let Some(schemas) = self.resolve(document, context)? else {
            return Ok(());
        };
        self.validate_with(&schemas, payload)
    }

    #[cfg(feature = "libxml2")]
    fn compile(&self, schemas: &SchemaSet) -> Result<XmlSchemaPtr> {
        let wrapper = LibXml2Wrapper::new();
        let compiled = match schemas.sources() {
            [source] => {
                let bytes = self.serializer.serialize(source)?;
                let key = CompiledSchemaCache::<XmlSchemaPtr>::generate_key(&bytes);
                self.compiled.get_or_load(key, || {
                    wrapper
                        .parse_schema_from_memory(&bytes)
                        .map_err(|e| e.to_string())
                })
            }
            _ => {
                let names: Vec<String> = schemas.sources().iter().map(SchemaSource::name).collect();
                debug!(origin = schemas.origin(), ?names, "Combining schemas into one collection");
                let collection = SchemaCollection::build(schemas, &self.serializer)?;
                let key = CompiledSchemaCache::<XmlSchemaPtr>::generate_key(&collection.fingerprint());
                self.compiled.get_or_load(key, || -> std::result::Result<XmlSchemaPtr, String> {
                    // libxml2 resolves imports through files
                    let dir = tempfile::TempDir::new().map_err(|e| e.to_string())?;
                    let root = collection.write_to(dir.path()).map_err(|e| e.to_string())?;
                    wrapper.parse_schema_from_file(&root).map_err(|e| e.to_string())
                })
            }
        };

        compiled.map_err(|e| {
            AssertError::Configuration(format!(
                "Failed to compile XML schema '{}': {}",
                schemas.origin(),
                e
            ))
        })
    }

    #[cfg(feature = "libxml2")]
    fn validate_with(&self, schemas: &SchemaSet, payload: &str) -> Result<()> {
        let compiled = self.compile(schemas)?;

        match LibXml2Wrapper::new().validate_memory(&compiled, payload.as_bytes())? {
            ValidationResult::Valid => {
                info!("Schema of received XML validated OK");
                Ok(())
            }
            ValidationResult::Invalid { errors, .. } => {
                error!("Schema validation failed for message:\n{}", payload);
                for message in &errors {
                    debug!("Found schema validation error: {}", message);
                }
                let first = errors
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "document is not valid".to_string());
                Err(AssertError::SchemaValidation { first, errors })
            }
            ValidationResult::InternalError { code } => Err(AssertError::LibXml2Internal {
                details: format!("validation returned internal code {}", code),
            }),
        }
    }

    #[cfg(not(feature = "libxml2"))]
    fn validate_with(&self, schemas: &SchemaSet, _payload: &str) -> Result<()> {
        Err(AssertError::Configuration(format!(
            "Cannot validate against schema '{}': XML schema validation requires the libxml2 feature",
            schemas.origin()
        )))
    }
}
