//! Parsed XML tree used by every comparison and query.
//!
//! `roxmltree` does the parsing; its read-only tree is copied into a small arena so
//! that whitespace-only text can be stripped and the document type declaration
//! (which `roxmltree` does not expose) can be represented as a regular node.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use roxmltree::ParsingOptions;

use crate::error::Result;

static DOCTYPE_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_doctype_regex() -> &'static Regex {
    DOCTYPE_REGEX.get_or_init(|| {
        Regex::new(
            r#"<!DOCTYPE\s+([^\s\[>]+)(?:\s+(PUBLIC|SYSTEM)\s*(?:"([^"]*)"|'([^']*)')(?:\s*(?:"([^"]*)"|'([^']*)'))?)?"#,
        )
        .expect("Failed to compile DOCTYPE regex")
    })
}

/// Index of a node inside its document. Ids follow document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Namespace-qualified name of an element or attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub local: String,
    pub namespace: Option<String>,
    pub prefix: Option<String>,
}

impl QName {
    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.local),
            None => self.local.clone(),
        }
    }
}

/// `xmlns` / `xmlns:prefix` declaration carried by an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    pub prefix: Option<String>,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Document,
    Element {
        name: QName,
        namespaces: Vec<NamespaceDecl>,
    },
    Attribute {
        name: QName,
        value: String,
    },
    Text(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: Option<String>,
    },
    DocumentType {
        name: String,
        public_id: Option<String>,
        system_id: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
struct Doctype {
    position: usize,
    name: String,
    public_id: Option<String>,
    system_id: Option<String>,
}

/// Arena-backed XML document
#[derive(Debug, Clone)]
pub struct XmlDocument {
    nodes: Vec<NodeData>,
}

impl XmlDocument {
    /// Parses a payload. DTDs are allowed so documents with a DOCTYPE can be compared.
    pub fn parse(text: &str) -> Result<Self> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let parsed = roxmltree::Document::parse_with_options(text, options)?;

        let root_start = parsed.root_element().range().start;
        let mut doctype = Self::extract_doctype(&text[..root_start]);

        let mut doc = XmlDocument {
            nodes: vec![NodeData {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
                attributes: Vec::new(),
            }],
        };
        let document_id = NodeId(0);

        for child in parsed.root().children() {
            if let Some(dt) = doctype.take_if(|dt| child.range().start > dt.position) {
                doc.push_node(
                    document_id,
                    NodeKind::DocumentType {
                        name: dt.name,
                        public_id: dt.public_id,
                        system_id: dt.system_id,
                    },
                );
            }
            doc.append(document_id, child);
        }

        Ok(doc)
    }

    fn extract_doctype(prolog: &str) -> Option<Doctype> {
        let caps = get_doctype_regex().captures(prolog)?;
        let position = caps.get(0)?.start();
        let first = caps.get(3).or_else(|| caps.get(4)).map(|m| m.as_str().to_string());
        let second = caps.get(5).or_else(|| caps.get(6)).map(|m| m.as_str().to_string());

        let (public_id, system_id) = match caps.get(2).map(|m| m.as_str()) {
            Some("PUBLIC") => (first, second),
            Some(_) => (None, first),
            None => (None, None),
        };

        Some(Doctype {
            position,
            name: caps[1].to_string(),
            public_id,
            system_id,
        })
    }

    fn push_node(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent: Some(parent),
            children: Vec::new(),
            attributes: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    fn append(&mut self, parent: NodeId, node: roxmltree::Node<'_, '_>) {
        match node.node_type() {
            roxmltree::NodeType::Element => {
                let tag = node.tag_name();
                let name = QName {
                    local: tag.name().to_string(),
                    namespace: tag.namespace().map(str::to_string),
                    prefix: tag
                        .namespace()
                        .and_then(|uri| node.lookup_prefix(uri))
                        .map(str::to_string),
                };
                let namespaces = Self::declared_namespaces(node);
                let id = self.push_node(parent, NodeKind::Element { name, namespaces });

                for attr in node.attributes() {
                    let attr_id = NodeId(self.nodes.len());
                    self.nodes.push(NodeData {
                        kind: NodeKind::Attribute {
                            name: QName {
                                local: attr.name().to_string(),
                                namespace: attr.namespace().map(str::to_string),
                                prefix: attr
                                    .namespace()
                                    .and_then(|uri| node.lookup_prefix(uri))
                                    .map(str::to_string),
                            },
                            value: attr.value().to_string(),
                        },
                        parent: Some(id),
                        children: Vec::new(),
                        attributes: Vec::new(),
                    });
                    self.nodes[id.0].attributes.push(attr_id);
                }

                for child in node.children() {
                    self.append(id, child);
                }
            }
            roxmltree::NodeType::Text => {
                self.push_node(parent, NodeKind::Text(node.text().unwrap_or_default().to_string()));
            }
            roxmltree::NodeType::Comment => {
                self.push_node(
                    parent,
                    NodeKind::Comment(node.text().unwrap_or_default().to_string()),
                );
            }
            roxmltree::NodeType::PI => {
                if let Some(pi) = node.pi() {
                    self.push_node(
                        parent,
                        NodeKind::ProcessingInstruction {
                            target: pi.target.to_string(),
                            data: pi.value.map(str::to_string),
                        },
                    );
                }
            }
            roxmltree::NodeType::Root => {}
        }
    }

    /// Namespaces declared on this element, i.e. in scope here but not on the parent.
    fn declared_namespaces(node: roxmltree::Node<'_, '_>) -> Vec<NamespaceDecl> {
        let inherited: Vec<(Option<&str>, &str)> = node
            .parent_element()
            .map(|p| p.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
            .unwrap_or_default();

        node.namespaces()
            .filter(|ns| ns.name() != Some("xml"))
            .filter(|ns| !inherited.contains(&(ns.name(), ns.uri())))
            .map(|ns| NamespaceDecl {
                prefix: ns.name().map(str::to_string),
                uri: ns.uri().to_string(),
            })
            .collect()
    }

    /// Removes whitespace-only text nodes from the whole tree.
    pub fn strip_whitespace_nodes(&mut self) {
        let whitespace: Vec<bool> = self
            .nodes
            .iter()
            .map(|n| matches!(&n.kind, NodeKind::Text(t) if t.trim().is_empty()))
            .collect();
        for node in &mut self.nodes {
            node.children.retain(|child| !whitespace[child.0]);
        }
    }

    /// The document node.
    pub fn root(&self) -> XmlNode<'_> {
        XmlNode {
            doc: self,
            id: NodeId(0),
        }
    }

    pub fn root_element(&self) -> Option<XmlNode<'_>> {
        self.root().children().find(|n| n.is_element())
    }

    pub fn node(&self, id: NodeId) -> XmlNode<'_> {
        XmlNode { doc: self, id }
    }

    /// Every element in document order.
    pub fn elements(&self) -> impl Iterator<Item = XmlNode<'_>> {
        self.root().descendants().filter(|n| n.is_element())
    }

    fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }
}

/// Borrowed handle to one node of an [`XmlDocument`]
#[derive(Clone, Copy)]
pub struct XmlNode<'a> {
    doc: &'a XmlDocument,
    id: NodeId,
}

impl PartialEq for XmlNode<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && std::ptr::eq(self.doc, other.doc)
    }
}

impl Eq for XmlNode<'_> {}

impl std::hash::Hash for XmlNode<'_> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for XmlNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlNode")
            .field("id", &self.id)
            .field("kind", self.kind())
            .finish()
    }
}

impl<'a> XmlNode<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn document(&self) -> &'a XmlDocument {
        self.doc
    }

    pub fn kind(&self) -> &'a NodeKind {
        &self.doc.data(self.id).kind
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind(), NodeKind::Element { .. })
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self.kind(), NodeKind::Attribute { .. })
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind(), NodeKind::Text(_))
    }

    pub fn parent(&self) -> Option<XmlNode<'a>> {
        self.doc.data(self.id).parent.map(|id| self.doc.node(id))
    }

    pub fn children(&self) -> impl DoubleEndedIterator<Item = XmlNode<'a>> + use<'a> {
        let doc = self.doc;
        doc.data(self.id).children.iter().map(move |&id| doc.node(id))
    }

    pub fn child_elements(&self) -> impl Iterator<Item = XmlNode<'a>> + use<'a> {
        self.children().filter(|n| n.is_element())
    }

    pub fn first_child(&self) -> Option<XmlNode<'a>> {
        self.children().next()
    }

    pub fn attributes(&self) -> impl Iterator<Item = XmlNode<'a>> + use<'a> {
        let doc = self.doc;
        doc.data(self.id).attributes.iter().map(move |&id| doc.node(id))
    }

    /// Looks up an attribute by local name and namespace URI.
    pub fn attribute(&self, local: &str, namespace: Option<&str>) -> Option<XmlNode<'a>> {
        self.attributes()
            .find(|a| a.local_name() == Some(local) && a.namespace() == namespace)
    }

    /// Preceding and following siblings share the parent's child list; attributes have none.
    fn siblings(&self) -> &'a [NodeId] {
        if self.is_attribute() {
            return &[];
        }
        match self.doc.data(self.id).parent {
            Some(parent) => &self.doc.data(parent).children,
            None => &[],
        }
    }

    pub fn following_siblings(&self) -> impl Iterator<Item = XmlNode<'a>> + use<'a> {
        let doc = self.doc;
        let siblings = self.siblings();
        let pos = siblings.iter().position(|&id| id == self.id);
        let rest = match pos {
            Some(p) => &siblings[p + 1..],
            None => &[],
        };
        rest.iter().map(move |&id| doc.node(id))
    }

    /// Preceding siblings, nearest first.
    pub fn preceding_siblings(&self) -> impl Iterator<Item = XmlNode<'a>> + use<'a> {
        let doc = self.doc;
        let siblings = self.siblings();
        let pos = siblings.iter().position(|&id| id == self.id).unwrap_or(0);
        siblings[..pos].iter().rev().map(move |&id| doc.node(id))
    }

    pub fn next_sibling(&self) -> Option<XmlNode<'a>> {
        self.following_siblings().next()
    }

    /// Ancestors from the parent upward, ending with the document node.
    pub fn ancestors(&self) -> impl Iterator<Item = XmlNode<'a>> + use<'a> {
        std::iter::successors(self.parent(), |n| n.parent())
    }

    /// Descendants in document order, excluding attributes and the node itself.
    pub fn descendants(&self) -> impl Iterator<Item = XmlNode<'a>> + use<'a> {
        let mut stack: Vec<XmlNode<'a>> = self.children().rev().collect();
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children().rev());
            Some(next)
        })
    }

    pub fn name(&self) -> Option<&'a QName> {
        match self.kind() {
            NodeKind::Element { name, .. } | NodeKind::Attribute { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Local name of elements and attributes, target of processing instructions.
    pub fn local_name(&self) -> Option<&'a str> {
        match self.kind() {
            NodeKind::Element { name, .. } | NodeKind::Attribute { name, .. } => {
                Some(name.local.as_str())
            }
            NodeKind::ProcessingInstruction { target, .. } => Some(target.as_str()),
            _ => None,
        }
    }

    pub fn namespace(&self) -> Option<&'a str> {
        self.name().and_then(|n| n.namespace.as_deref())
    }

    pub fn qualified_name(&self) -> String {
        match self.kind() {
            NodeKind::ProcessingInstruction { target, .. } => target.clone(),
            _ => self.name().map(QName::qualified).unwrap_or_default(),
        }
    }

    /// Value in the DOM sense: attribute value, text, comment or PI data.
    /// Elements and the document have no value of their own.
    pub fn value(&self) -> Option<&'a str> {
        match self.kind() {
            NodeKind::Attribute { value, .. } => Some(value.as_str()),
            NodeKind::Text(text) | NodeKind::Comment(text) => Some(text.as_str()),
            NodeKind::ProcessingInstruction { data, .. } => Some(data.as_deref().unwrap_or("")),
            _ => None,
        }
    }

    /// Concatenated direct text children of an element.
    pub fn text(&self) -> String {
        self.children()
            .filter_map(|c| match c.kind() {
                NodeKind::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// XPath string-value: all descendant text for elements and the document.
    pub fn string_value(&self) -> String {
        match self.kind() {
            NodeKind::Document | NodeKind::Element { .. } => self
                .descendants()
                .filter_map(|n| match n.kind() {
                    NodeKind::Text(t) => Some(t.as_str()),
                    _ => None,
                })
                .collect(),
            NodeKind::DocumentType { .. } => String::new(),
            _ => self.value().unwrap_or_default().to_string(),
        }
    }

    pub fn namespace_declarations(&self) -> &'a [NamespaceDecl] {
        match self.kind() {
            NodeKind::Element { namespaces, .. } => namespaces,
            _ => &[],
        }
    }

    /// Resolves a prefix against the declarations in scope at this node.
    pub fn lookup_namespace(&self, prefix: Option<&str>) -> Option<&'a str> {
        std::iter::once(*self)
            .chain(self.ancestors())
            .flat_map(|n| n.namespace_declarations().iter())
            .find(|decl| decl.prefix.as_deref() == prefix)
            .map(|decl| decl.uri.as_str())
    }

    /// Dot-joined local names from the root element down to this node.
    pub fn path_name(&self) -> String {
        match self.kind() {
            NodeKind::Attribute { name, .. } => match self.parent() {
                Some(owner) => format!("{}.{}", owner.path_name(), name.local),
                None => name.local.clone(),
            },
            NodeKind::Element { name, .. } => match self.parent().filter(|p| p.is_element()) {
                Some(parent) => format!("{}.{}", parent.path_name(), name.local),
                None => name.local.clone(),
            },
            _ => String::new(),
        }
    }
}
