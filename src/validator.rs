//! Structural validation of a received XML message against a control message.
//!
//! Validation runs in a fixed order and stops at the first failure:
//! 1. XML schema validation of the received payload (when enabled),
//! 2. namespace declarations on the received root element,
//! 3. the recursive tree comparison of received and control payloads,
//! 4. the same tree comparison for every header-data fragment of the control message.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::context::TestContext;
use crate::document::{NodeKind, XmlDocument, XmlNode};
use crate::error::{AssertError, Result, or_null};
use crate::ignore::DocumentIgnoreRules;
use crate::matcher::{DefaultMatcherResolver, MatcherResolver, is_ignore_placeholder};
use crate::message::Message;
use crate::namespace::{NamespaceContextBuilder, document_namespaces, root_namespaces};
use crate::schema::SchemaRegistry;
use crate::validation::XmlValidationContext;

/// Message validator comparing parsed XML trees node by node.
pub struct DomXmlValidator {
    schemas: Arc<SchemaRegistry>,
    namespace_builder: NamespaceContextBuilder,
    matchers: Arc<dyn MatcherResolver>,
}

impl Default for DomXmlValidator {
    fn default() -> Self {
        Self {
            schemas: Arc::new(SchemaRegistry::new()),
            namespace_builder: NamespaceContextBuilder::new(),
            matchers: Arc::new(DefaultMatcherResolver::new()),
        }
    }
}

impl DomXmlValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema_registry(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn with_namespace_builder(mut self, builder: NamespaceContextBuilder) -> Self {
        self.namespace_builder = builder;
        self
    }

    pub fn with_matcher_resolver(mut self, matchers: Arc<dyn MatcherResolver>) -> Self {
        self.matchers = matchers;
        self
    }

    pub fn schema_registry(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    /// Validates `received` against `control`. A control message without payload
    /// only contributes its header-data fragments.
    pub fn validate(
        &self,
        received: &Message,
        control: &Message,
        validation: &XmlValidationContext,
        context: &TestContext,
    ) -> Result<()> {
        debug!("Start XML message validation ...");

        let result = self.validate_in_order(received, control, validation, context);
        match &result {
            Ok(()) => info!("XML message validation successful: All values OK"),
            Err(err) => error!(
                error = %err,
                "Failed to validate:\n{}",
                received.payload_as_text().unwrap_or_default()
            ),
        }
        result
    }

    fn validate_in_order(
        &self,
        received: &Message,
        control: &Message,
        validation: &XmlValidationContext,
        context: &TestContext,
    ) -> Result<()> {
        if validation.is_schema_validation_enabled() {
            self.validate_schema(received, validation)?;
        }

        self.validate_namespaces(validation.control_namespaces(), received)?;
        self.validate_content(received, control, validation, context)?;

        let received_fragments = received.header_data();
        let control_fragments = control.header_data();
        if control_fragments.len() > received_fragments.len() {
            return Err(AssertError::StructuralMismatch(format!(
                "Failed to validate header data XML fragments - found {} header fragments, expected {}",
                received_fragments.len(),
                control_fragments.len()
            )));
        }
        for (received_fragment, control_fragment) in received_fragments.iter().zip(control_fragments)
        {
            self.validate_header_fragment(received_fragment, control_fragment, validation, context)?;
        }

        Ok(())
    }

    /// Schema validation is skipped for empty payloads and root elements without namespace.
    pub fn validate_schema(
        &self,
        received: &Message,
        validation: &XmlValidationContext,
    ) -> Result<()> {
        let Some(payload) = received.payload_as_text().filter(|p| !p.trim().is_empty()) else {
            return Ok(());
        };

        let document = XmlDocument::parse(&payload)?;
        let has_namespace = document
            .root_element()
            .and_then(|root| root.namespace())
            .is_some_and(|ns| !ns.is_empty());
        if !has_namespace {
            return Ok(());
        }

        debug!("Starting XML schema validation ...");
        self.schemas.validate(&payload, &document, validation)
    }

    /// The received root element must declare exactly the expected namespaces.
    pub fn validate_namespaces(
        &self,
        expected: &BTreeMap<String, String>,
        received: &Message,
    ) -> Result<()> {
        if expected.is_empty() {
            return Ok(());
        }

        let Some(payload) = received.payload_as_text().filter(|p| !p.trim().is_empty()) else {
            return Err(AssertError::StructuralMismatch(
                "Unable to validate message namespaces - receive message payload was empty"
                    .to_string(),
            ));
        };

        debug!("Start XML namespace validation");

        let document = XmlDocument::parse(&payload)?;
        let node_path = document
            .root_element()
            .map(|root| root.path_name())
            .unwrap_or_default();
        let found = root_namespaces(&document);

        if found.len() != expected.len() {
            return Err(AssertError::StructuralMismatch(format!(
                "Number of namespace declarations not equal for node {} found {} expected {}",
                node_path,
                found.len(),
                expected.len()
            )));
        }

        for (prefix, uri) in expected {
            match found.get(prefix) {
                Some(found_uri) if found_uri == uri => {
                    debug!("Validating namespace {} value as expected {} - value OK", prefix, uri);
                }
                Some(found_uri) => {
                    return Err(AssertError::StructuralMismatch(format!(
                        "Namespace '{}' values not equal: found '{}' expected '{}' in reference node {}",
                        prefix, found_uri, uri, node_path
                    )));
                }
                None => {
                    return Err(AssertError::StructuralMismatch(format!(
                        "Missing namespace {}({}) in node {}",
                        prefix, uri, node_path
                    )));
                }
            }
        }

        info!("XML namespace validation successful: All values OK");
        Ok(())
    }

    /// Compares the payload trees. Skipped when the control message has no
    /// payload or an empty one.
    pub fn validate_content(
        &self,
        received: &Message,
        control: &Message,
        validation: &XmlValidationContext,
        context: &TestContext,
    ) -> Result<()> {
        let Some(control_payload) = control.payload_as_text() else {
            debug!("Skip message payload validation as no control message was defined");
            return Ok(());
        };

        let received_payload = received.payload_as_text().unwrap_or_default();
        if received_payload.trim().is_empty() {
            if control_payload.trim().is_empty() {
                return Ok(());
            }
            return Err(AssertError::StructuralMismatch(
                "Unable to validate message payload - received message payload was empty, control message payload is not"
                    .to_string(),
            ));
        }
        if control_payload.trim().is_empty() {
            return Ok(());
        }

        debug!("Start XML tree validation ...");
        self.validate_trees(&received_payload, &control_payload, validation, context)
    }

    fn validate_header_fragment(
        &self,
        received: &str,
        control: &str,
        validation: &XmlValidationContext,
        context: &TestContext,
    ) -> Result<()> {
        debug!("Start XML header data validation ...");
        self.validate_trees(received, control, validation, context)
    }

    fn validate_trees(
        &self,
        received: &str,
        control: &str,
        validation: &XmlValidationContext,
        context: &TestContext,
    ) -> Result<()> {
        let mut received_doc = XmlDocument::parse(received)?;
        let mut control_doc = XmlDocument::parse(control)?;
        received_doc.strip_whitespace_nodes();
        control_doc.strip_whitespace_nodes();

        debug!("Received message:\n{}", received);
        debug!("Control message:\n{}", control);

        let namespaces = self
            .namespace_builder
            .build_context(&received_doc, validation.namespaces());
        let comparison = TreeComparison {
            ignore: validation.ignore().for_document(&received_doc, &namespaces)?,
            matchers: self.matchers.as_ref(),
            context,
        };
        comparison.validate_node(received_doc.root(), control_doc.root())
    }
}

/// State of one tree comparison.
struct TreeComparison<'v, 'd> {
    ignore: DocumentIgnoreRules<'v, 'd>,
    matchers: &'v dyn MatcherResolver,
    context: &'v TestContext,
}

/// Comments and processing instructions take no part in the comparison.
fn is_significant(node: &XmlNode<'_>) -> bool {
    match node.kind() {
        NodeKind::Comment(_) => false,
        NodeKind::ProcessingInstruction { target, data } => {
            debug!(
                "Ignored processing instruction ({}={})",
                target,
                data.as_deref().unwrap_or_default()
            );
            false
        }
        _ => true,
    }
}

fn kind_name(node: &XmlNode<'_>) -> &'static str {
    match node.kind() {
        NodeKind::Document => "document",
        NodeKind::Element { .. } => "element",
        NodeKind::Attribute { .. } => "attribute",
        NodeKind::Text(_) => "text",
        NodeKind::Comment(_) => "comment",
        NodeKind::ProcessingInstruction { .. } => "processing instruction",
        NodeKind::DocumentType { .. } => "document type definition",
    }
}

impl TreeComparison<'_, '_> {
    fn validate_node(&self, received: XmlNode<'_>, control: XmlNode<'_>) -> Result<()> {
        match received.kind() {
            NodeKind::Document => self.validate_document(received, control),
            NodeKind::DocumentType { .. } => self.validate_document_type(received, control),
            NodeKind::Element { .. } => self.validate_element(received, control),
            NodeKind::Attribute { .. } => Err(AssertError::Internal(format!(
                "Attribute '{}' reached the node dispatch outside of its element",
                received.path_name()
            ))),
            NodeKind::Comment(_) | NodeKind::ProcessingInstruction { .. } | NodeKind::Text(_) => {
                Ok(())
            }
        }
    }

    /// Top-level nodes are paired by position once comments and PIs are skipped.
    fn validate_document(&self, received: XmlNode<'_>, control: XmlNode<'_>) -> Result<()> {
        let received_nodes: Vec<_> = received.children().filter(is_significant).collect();
        let control_nodes: Vec<_> = control.children().filter(is_significant).collect();

        for (index, received_node) in received_nodes.iter().enumerate() {
            match control_nodes.get(index) {
                Some(control_node) => self.validate_node(*received_node, *control_node)?,
                None if matches!(received_node.kind(), NodeKind::DocumentType { .. }) => {
                    return Err(AssertError::StructuralMismatch(
                        "Missing document type definition in expected xml fragment".to_string(),
                    ));
                }
                None => {
                    return Err(AssertError::mismatch(
                        "Number of document nodes not equal",
                        control_nodes.len(),
                        received_nodes.len(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_document_type(&self, received: XmlNode<'_>, control: XmlNode<'_>) -> Result<()> {
        let NodeKind::DocumentType {
            public_id: received_public,
            system_id: received_system,
            ..
        } = received.kind()
        else {
            return Ok(());
        };
        let NodeKind::DocumentType {
            public_id: control_public,
            system_id: control_system,
            ..
        } = control.kind()
        else {
            return Err(AssertError::StructuralMismatch(
                "Missing document type definition in expected xml fragment".to_string(),
            ));
        };

        debug!(
            "Validating document type definition: {} ({})",
            or_null(received_public.as_deref()),
            or_null(received_system.as_deref())
        );

        validate_dtd_identifier(
            "Document type public id not equal",
            "public id",
            received_public.as_deref(),
            control_public.as_deref(),
        )?;
        validate_dtd_identifier(
            "Document type system id not equal",
            "system id",
            received_system.as_deref(),
            control_system.as_deref(),
        )
    }

    fn validate_element(&self, received: XmlNode<'_>, control: XmlNode<'_>) -> Result<()> {
        let received_name = received.local_name().unwrap_or_default();
        if !control.is_element() {
            return Err(AssertError::mismatch(
                format!("Node type not equal for element '{}'", received_name),
                kind_name(&control),
                kind_name(&received),
            ));
        }
        let control_name = control.local_name().unwrap_or_default();

        debug!("Validating element: {} ({})", received_name, or_null(received.namespace()));
        if received_name != control_name {
            return Err(AssertError::mismatch(
                "Element names not equal",
                control_name,
                received_name,
            ));
        }

        debug!("Validating namespace for element: {}", received_name);
        if received.namespace() != control.namespace() {
            return Err(AssertError::mismatch(
                format!("Element namespace not equal for element '{}'", received_name),
                or_null(control.namespace()),
                or_null(received.namespace()),
            ));
        }

        if self.is_element_ignored(received, control) {
            return Ok(());
        }

        debug!("Validating attributes for element: {}", received_name);
        let received_count = received.attributes().count();
        let control_count = control.attributes().count();
        if received_count != control_count {
            return Err(AssertError::mismatch(
                format!("Number of attributes not equal for element '{}'", received_name),
                control_count,
                received_count,
            ));
        }
        for attribute in received.attributes() {
            self.validate_attribute(received, attribute, control)?;
        }

        if let Some(expression) = self.element_matcher(control) {
            let actual = received
                .first_child()
                .and_then(|child| child.value())
                .unwrap_or_default()
                .trim()
                .to_string();
            return self.matchers.resolve(
                &control.qualified_name(),
                &actual,
                expression.trim(),
                self.context,
            );
        }

        self.validate_text(received, control)?;

        let received_children: Vec<_> = received.child_elements().collect();
        let control_children: Vec<_> = control.child_elements().collect();
        if received_children.len() != control_children.len() {
            return Err(AssertError::mismatch(
                format!("Number of child elements not equal for element '{}'", received_name),
                control_children.len(),
                received_children.len(),
            ));
        }
        for (received_child, control_child) in received_children.into_iter().zip(control_children) {
            self.validate_node(received_child, control_child)?;
        }

        debug!(
            "Validation successful for element: {} ({})",
            received_name,
            or_null(received.namespace())
        );
        Ok(())
    }

    /// Ignored by a rule on the received element or by the placeholder as control text.
    fn is_element_ignored(&self, received: XmlNode<'_>, control: XmlNode<'_>) -> bool {
        let placeholder = control
            .first_child()
            .and_then(|child| child.value())
            .is_some_and(is_ignore_placeholder);
        if placeholder {
            debug!(
                "Element '{}' is ignored by placeholder '{}'",
                received.path_name(),
                crate::matcher::IGNORE_PLACEHOLDER
            );
            return true;
        }
        self.ignore.is_ignored(&received)
    }

    /// Matcher expression carried as the control element's first text child.
    fn element_matcher<'a>(&self, control: XmlNode<'a>) -> Option<&'a str> {
        let first = control.first_child().filter(|child| child.is_text())?;
        let text = first.value()?;
        (!text.trim().is_empty() && self.matchers.is_matcher_expression(text.trim()))
            .then_some(text)
    }

    fn validate_text(&self, received: XmlNode<'_>, control: XmlNode<'_>) -> Result<()> {
        let received_name = received.local_name().unwrap_or_default();
        debug!("Validating node value for element: {}", received_name);

        let received_text = received.text();
        let control_text = control.text();
        if received_text.trim() != control_text.trim() {
            return Err(AssertError::mismatch(
                format!("Node value not equal for element '{}'", received_name),
                control_text.trim(),
                received_text.trim(),
            ));
        }

        debug!("Node value '{}': OK", received_text.trim());
        Ok(())
    }

    fn validate_attribute(
        &self,
        received_element: XmlNode<'_>,
        received: XmlNode<'_>,
        control_element: XmlNode<'_>,
    ) -> Result<()> {
        let name = received.local_name().unwrap_or_default();
        debug!("Validating attribute: {} ({})", name, or_null(received.namespace()));

        let control = control_element
            .attribute(name, received.namespace())
            .ok_or_else(|| {
                AssertError::StructuralMismatch(format!(
                    "Attribute validation failed for element '{}', unknown attribute {} ({})",
                    received_element.local_name().unwrap_or_default(),
                    name,
                    or_null(received.namespace())
                ))
            })?;

        let received_value = received.value().unwrap_or_default();
        let control_value = control.value().unwrap_or_default();

        if is_ignore_placeholder(control_value) {
            debug!(
                "Attribute '{}' is ignored by placeholder '{}'",
                received.path_name(),
                crate::matcher::IGNORE_PLACEHOLDER
            );
            return Ok(());
        }
        if self.ignore.is_ignored(&received) {
            return Ok(());
        }

        if !control_value.trim().is_empty() && self.matchers.is_matcher_expression(control_value.trim())
        {
            self.matchers.resolve(
                &control.qualified_name(),
                received_value.trim(),
                control_value.trim(),
                self.context,
            )?;
        } else if received_value.contains(':') && control_value.contains(':') {
            validate_qualified_value(received_element, received, control_element, control)?;
        } else if received_value != control_value {
            return Err(AssertError::mismatch(
                format!("Values not equal for attribute '{}'", name),
                control_value,
                received_value,
            ));
        }

        debug!("Attribute '{}'='{}': OK", name, received_value);
        Ok(())
    }
}

/// A blank control id requires the received id to be absent, the ignore
/// placeholder accepts anything, otherwise both ids must be equal.
fn validate_dtd_identifier(
    message: &str,
    label: &str,
    received: Option<&str>,
    control: Option<&str>,
) -> Result<()> {
    match control.filter(|id| !id.trim().is_empty()) {
        None => {
            if received.is_some() {
                return Err(AssertError::mismatch(message, or_null(control), or_null(received)));
            }
        }
        Some(id) if is_ignore_placeholder(id) => {
            debug!(
                "Document type {}: '{}' is ignored by placeholder '{}'",
                label,
                or_null(received),
                crate::matcher::IGNORE_PLACEHOLDER
            );
        }
        Some(id) => {
            let equal = received.is_some_and(|r| !r.trim().is_empty() && r == id);
            if !equal {
                return Err(AssertError::mismatch(message, id, or_null(received)));
            }
        }
    }
    Ok(())
}

/// Prefix bound at `element`, falling back to any declaration in its document.
fn resolve_prefix(element: XmlNode<'_>, prefix: &str) -> Option<String> {
    element
        .lookup_namespace(Some(prefix))
        .map(str::to_string)
        .or_else(|| document_namespaces(element.document()).remove(prefix))
}

/// Compares `prefix:value` attribute values by the namespaces their prefixes
/// resolve to instead of by the prefixes themselves.
fn validate_qualified_value(
    received_element: XmlNode<'_>,
    received: XmlNode<'_>,
    control_element: XmlNode<'_>,
    control: XmlNode<'_>,
) -> Result<()> {
    let name = received.local_name().unwrap_or_default();
    let received_value = received.value().unwrap_or_default();
    let control_value = control.value().unwrap_or_default();

    let mut received_local = received_value;
    let mut control_local = control_value;

    if let (Some((received_prefix, received_rest)), Some((control_prefix, control_rest))) =
        (received_value.split_once(':'), control_value.split_once(':'))
        && let Some(received_uri) = resolve_prefix(received_element, received_prefix)
    {
        let Some(control_uri) = resolve_prefix(control_element, control_prefix) else {
            return Err(AssertError::StructuralMismatch(format!(
                "Received attribute value '{}' describes namespace qualified attribute value, control value '{}' does not",
                name, control_value
            )));
        };
        if control_uri != received_uri {
            return Err(AssertError::mismatch(
                format!("Values not equal for attribute value namespace '{}'", received_value),
                control_uri,
                received_uri,
            ));
        }
        received_local = received_rest;
        control_local = control_rest;
    }

    if received_local != control_local {
        return Err(AssertError::mismatch(
            format!("Values not equal for attribute '{}'", name),
            control_local,
            received_local,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MockMatcherResolver;

    fn validate_with(received: &str, control: &str, validation: &XmlValidationContext) -> Result<()> {
        DomXmlValidator::new().validate(
            &Message::new(received),
            &Message::new(control),
            &validation.clone().with_schema_validation(false),
            &TestContext::new(),
        )
    }

    fn validate(received: &str, control: &str) -> Result<()> {
        validate_with(received, control, &XmlValidationContext::new())
    }

    fn mismatch(received: &str, control: &str) -> String {
        let err = validate(received, control).unwrap_err();
        assert!(err.is_mismatch(), "unexpected error kind: {err:?}");
        err.to_string()
    }

    #[test]
    fn test_identical_trees() {
        validate("<root><a>X</a></root>", "<root><a>X</a></root>").unwrap();
        validate(
            "<root>\n  <a>X</a>\n</root>",
            "<root><!-- comment --><a>X</a></root>",
        )
        .unwrap();
    }

    #[test]
    fn test_text_mismatch() {
        let message = mismatch("<root><a>X</a><b>Y</b></root>", "<root><a>Z</a><b>Y</b></root>");
        assert_eq!(
            message,
            "Node value not equal for element 'a', expected 'Z' but was 'X'"
        );
    }

    #[test]
    fn test_ignored_element_still_requires_name() {
        let validation = XmlValidationContext::new()
            .with_ignore_expressions(["root.a"])
            .unwrap();
        validate_with(
            "<root><a attr='1'>X<c/></a><b>Y</b></root>",
            "<root><a>Z</a><b>Y</b></root>",
            &validation,
        )
        .unwrap();

        let err = validate_with(
            "<root><x>X</x><b>Y</b></root>",
            "<root><a>Z</a><b>Y</b></root>",
            &validation,
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("Element names not equal"));
    }

    #[test]
    fn test_path_query_rules_over_many_nodes() {
        let items = |value: &str| -> String {
            (0..500)
                .map(|i| {
                    let skip = if i % 2 == 0 { " skip='yes'" } else { "" };
                    let text = if i % 2 == 0 { value } else { "same" };
                    format!("<item id='{i}'{skip}>{text}</item>")
                })
                .collect()
        };
        let received = format!("<root>{}</root>", items("received"));
        let control = format!("<root>{}</root>", items("control"));

        let validation = XmlValidationContext::new()
            .with_ignore_expressions(["//item[@skip]"])
            .unwrap();
        validate_with(&received, &control, &validation).unwrap();

        let err = validate(&received, &control).unwrap_err();
        assert!(err.is_mismatch());

        let unbound = XmlValidationContext::new()
            .with_ignore_expressions(["//zz:item"])
            .unwrap();
        assert!(
            validate_with(&received, &control, &unbound)
                .unwrap_err()
                .is_expression_error()
        );
    }

    #[test]
    fn test_ignore_placeholder_in_control() {
        validate(
            "<root><a>X<c/></a><b attr='v'>Y</b></root>",
            "<root><a>@ignore@</a><b attr='@ignore@'>Y</b></root>",
        )
        .unwrap();
    }

    #[test]
    fn test_namespace_mismatch() {
        let message = mismatch(
            r#"<root xmlns="urn:a"><a>X</a></root>"#,
            r#"<root><a>X</a></root>"#,
        );
        assert_eq!(
            message,
            "Element namespace not equal for element 'root', expected 'null' but was 'urn:a'"
        );

        validate(
            r#"<ns1:root xmlns:ns1="urn:a"><ns1:a>X</ns1:a></ns1:root>"#,
            r#"<p:root xmlns:p="urn:a"><p:a>X</p:a></p:root>"#,
        )
        .unwrap();
    }

    #[test]
    fn test_attribute_rules() {
        let message = mismatch("<root a='1' b='2'/>", "<root a='1'/>");
        assert!(message.starts_with("Number of attributes not equal for element 'root'"));

        let message = mismatch("<root b='2'/>", "<root a='2'/>");
        assert_eq!(
            message,
            "Attribute validation failed for element 'root', unknown attribute b (null)"
        );

        let message = mismatch("<root a='1'/>", "<root a='2'/>");
        assert_eq!(message, "Values not equal for attribute 'a', expected '2' but was '1'");

        validate(
            r#"<root xmlns:x="urn:x" x:a="1"/>"#,
            r#"<root xmlns:y="urn:x" y:a="1"/>"#,
        )
        .unwrap();
    }

    #[test]
    fn test_attribute_matcher() {
        validate(
            "<root><element attributeA='attribute-value'/></root>",
            "<root><element attributeA=\"@startsWith('attribute-')@\"/></root>",
        )
        .unwrap();

        let err = validate(
            "<root><element attributeA='attribute-value'/></root>",
            "<root><element attributeA=\"@startsWith('other-')@\"/></root>",
        )
        .unwrap_err();
        assert!(err.is_mismatch());
    }

    #[test]
    fn test_element_matcher_skips_children() {
        validate(
            "<root><element>text-value</element></root>",
            "<root><element>@contains('ext-val')@</element></root>",
        )
        .unwrap();
    }

    #[test]
    fn test_qualified_attribute_values() {
        validate(
            r#"<root xmlns:a="urn:types" type="a:Order"/>"#,
            r#"<root xmlns:b="urn:types" type="b:Order"/>"#,
        )
        .unwrap();

        let message = mismatch(
            r#"<root xmlns:a="urn:types" type="a:Order"/>"#,
            r#"<root xmlns:b="urn:other" type="b:Order"/>"#,
        );
        assert!(message.starts_with("Values not equal for attribute value namespace 'a:Order'"));

        let message = mismatch(
            r#"<root xmlns:a="urn:types" type="a:Order"/>"#,
            r#"<root type="b:Order"/>"#,
        );
        assert!(message.contains("describes namespace qualified attribute value"));
    }

    #[test]
    fn test_child_count_mismatch() {
        let message = mismatch("<root><a/><a/></root>", "<root><a/></root>");
        assert_eq!(
            message,
            "Number of child elements not equal for element 'root', expected '1' but was '2'"
        );
    }

    #[test]
    fn test_children_are_positional() {
        let message = mismatch("<root><b/><a/></root>", "<root><a/><b/></root>");
        assert!(message.starts_with("Element names not equal"));
    }

    #[test]
    fn test_doctype_comparison() {
        let dtd = |public: &str, system: &str| {
            format!(r#"<!DOCTYPE root PUBLIC "{}" "{}"><root/>"#, public, system)
        };
        validate(&dtd("-//A//EN", "a.dtd"), &dtd("-//A//EN", "a.dtd")).unwrap();
        validate(&dtd("-//A//EN", "a.dtd"), &dtd("@ignore@", "@ignore@")).unwrap();

        let message = mismatch(&dtd("-//A//EN", "a.dtd"), &dtd("-//B//EN", "a.dtd"));
        assert!(message.starts_with("Document type public id not equal"));

        let message = mismatch(&dtd("-//A//EN", "a.dtd"), "<root/>");
        assert_eq!(message, "Missing document type definition in expected xml fragment");

        let message = mismatch(
            &dtd("-//A//EN", "a.dtd"),
            r#"<!DOCTYPE root SYSTEM "a.dtd"><root/>"#,
        );
        assert!(message.starts_with("Document type public id not equal"));
    }

    #[test]
    fn test_processing_instructions_are_ignored() {
        validate("<?pi data?><root><?x y?><a/></root>", "<root><a/></root>").unwrap();
    }

    #[test]
    fn test_control_without_payload_skips_content() {
        DomXmlValidator::new()
            .validate(
                &Message::new("<root><a>X</a></root>"),
                &Message::empty(),
                &XmlValidationContext::new(),
                &TestContext::new(),
            )
            .unwrap();
    }

    #[test]
    fn test_empty_received_payload() {
        let err = validate("", "<root/>").unwrap_err();
        assert!(err.to_string().contains("received message payload was empty"));
        validate("", "  ").unwrap();
        validate("<root/>", "").unwrap();
    }

    #[test]
    fn test_control_namespaces() {
        let received = Message::new(r#"<ns1:root xmlns:ns1="urn:one" xmlns:ns2="urn:two"/>"#);
        let validator = DomXmlValidator::new();
        let run = |expected: &[(&str, &str)]| {
            let map: BTreeMap<String, String> = expected
                .iter()
                .map(|(p, u)| (p.to_string(), u.to_string()))
                .collect();
            validator.validate_namespaces(&map, &received)
        };

        run(&[("ns1", "urn:one"), ("ns2", "urn:two")]).unwrap();
        assert!(
            run(&[("ns1", "urn:one")])
                .unwrap_err()
                .to_string()
                .starts_with("Number of namespace declarations not equal for node root found 2 expected 1")
        );
        assert!(
            run(&[("ns1", "urn:one"), ("ns2", "urn:wrong")])
                .unwrap_err()
                .to_string()
                .contains("Namespace 'ns2' values not equal")
        );
        assert!(
            run(&[("ns1", "urn:one"), ("ns3", "urn:two")])
                .unwrap_err()
                .to_string()
                .starts_with("Missing namespace ns3(urn:two)")
        );
    }

    #[test]
    fn test_header_fragments() {
        let received = Message::new("<root/>")
            .with_header_data("<h:header xmlns:h='urn:h'><h:id>1</h:id></h:header>");
        let control = Message::new("<root/>")
            .with_header_data("<h:header xmlns:h='urn:h'><h:id>2</h:id></h:header>");
        let err = DomXmlValidator::new()
            .validate(&received, &control, &XmlValidationContext::new(), &TestContext::new())
            .unwrap_err();
        assert!(err.to_string().starts_with("Node value not equal for element 'id'"));

        let too_many = Message::new("<root/>")
            .with_header_data("<a/>")
            .with_header_data("<b/>");
        let err = DomXmlValidator::new()
            .validate(&received, &too_many, &XmlValidationContext::new(), &TestContext::new())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to validate header data XML fragments - found 1 header fragments, expected 2"
        );
    }

    #[test]
    fn test_custom_matcher_resolver() {
        let mut resolver = MockMatcherResolver::new();
        resolver
            .expect_is_matcher_expression()
            .returning(|expression| expression == "#any#");
        resolver
            .expect_resolve()
            .withf(|field, actual, control, _| field == "a" && actual == "1" && control == "#any#")
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        DomXmlValidator::new()
            .with_matcher_resolver(Arc::new(resolver))
            .validate(
                &Message::new("<root a='1'/>"),
                &Message::new("<root a='#any#'/>"),
                &XmlValidationContext::new(),
                &TestContext::new(),
            )
            .unwrap();
    }

    #[test]
    fn test_idempotent() {
        let first = validate("<root><a>X</a></root>", "<root><a>Z</a></root>").unwrap_err();
        let second = validate("<root><a>X</a></root>", "<root><a>Z</a></root>").unwrap_err();
        assert_eq!(first.to_string(), second.to_string());
    }

    #[test]
    fn test_schema_skipped_without_namespace() {
        DomXmlValidator::new()
            .validate_schema(&Message::new("<root/>"), &XmlValidationContext::new())
            .unwrap();
        DomXmlValidator::new()
            .validate_schema(&Message::new(r#"<root xmlns="urn:a"/>"#), &XmlValidationContext::new())
            .unwrap();
    }
}
