use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::fs;

pub const ORDER_NS: &str = "http://example.com/orders";

pub const ORDER_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="http://example.com/orders"
           xmlns="http://example.com/orders"
           elementFormDefault="qualified">
    <xs:element name="order">
        <xs:complexType>
            <xs:sequence>
                <xs:element name="id" type="xs:int"/>
                <xs:element name="customer" type="xs:string"/>
                <xs:element name="item" type="xs:string" maxOccurs="unbounded"/>
            </xs:sequence>
            <xs:attribute name="status" type="xs:string"/>
        </xs:complexType>
    </xs:element>
</xs:schema>"#;

pub const INVOICE_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="http://example.com/invoices"
           elementFormDefault="qualified">
    <xs:element name="invoice" type="xs:string"/>
</xs:schema>"#;

pub const ORDER_XML: &str = r#"<order xmlns="http://example.com/orders" status="open">
    <id>42</id>
    <customer>ACME</customer>
    <item>bolt</item>
    <item>nut</item>
</order>"#;

/// Order with an element the schema does not allow.
pub const INVALID_ORDER_XML: &str = r#"<order xmlns="http://example.com/orders">
    <id>not-a-number</id>
    <customer>ACME</customer>
    <item>bolt</item>
</order>"#;

/// Control document for `ORDER_XML` using ignore placeholders and matchers.
pub const ORDER_CONTROL_XML: &str = r#"<order xmlns="http://example.com/orders" status="@startsWith('op')@">
    <id>@isNumber()@</id>
    <customer>ACME</customer>
    <item>bolt</item>
    <item>@ignore@</item>
</order>"#;

/// Temporary directory holding the order and invoice schemas.
pub async fn create_schema_dir() -> std::io::Result<TempDir> {
    let temp_dir = TempDir::new()?;
    fs::write(temp_dir.path().join("orders.xsd"), ORDER_XSD).await?;
    fs::write(temp_dir.path().join("invoices.xsd"), INVOICE_XSD).await?;
    fs::write(temp_dir.path().join("README.txt"), "not a schema").await?;
    Ok(temp_dir)
}

/// Writes `content` to `name` inside `dir` and returns the path.
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}
