mod common;

use std::path::Path;
use std::process::{Command, Output};

use common::test_helpers::{INVALID_ORDER_XML, ORDER_CONTROL_XML, ORDER_XML, write_file};
use tempfile::TempDir;

fn xml_assert(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_xml-assert"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env("XDG_CONFIG_HOME", dir)
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_cli_help_output() {
    let dir = TempDir::new().unwrap();
    let output = xml_assert(dir.path(), &["--help"]);

    assert!(output.status.success());
    let stdout = stdout(&output);
    for flag in [
        "--control",
        "--ignore",
        "--namespace",
        "--xpath",
        "--extract",
        "--schema",
        "--lenient",
        "--no-schema-validation",
        "--config",
        "--format",
        "--quiet",
    ] {
        assert!(stdout.contains(flag), "help is missing {flag}");
    }
}

#[test]
fn test_cli_structural_success_and_failure() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "received.xml", "<root><a>X</a><b>Y</b></root>");
    write_file(dir.path(), "control.xml", "<root><a>Z</a><b>Y</b></root>");

    let output = xml_assert(
        dir.path(),
        &["received.xml", "--control", "control.xml", "--ignore", "root.a"],
    );
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("OK"));

    let output = xml_assert(dir.path(), &["received.xml", "--control", "control.xml"]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = stdout(&output);
    assert!(stdout.contains("structural-mismatch"));
    assert!(stdout.contains("expected 'Z' but was 'X'"));
}

#[test]
fn test_cli_xpath_and_extract_json() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "order.xml", ORDER_XML);

    let output = xml_assert(
        dir.path(),
        &[
            "order.xml",
            "-n",
            "o=http://example.com/orders",
            "--xpath",
            "/o:order/o:customer=ACME",
            "--xpath",
            "/o:order/@status=open",
            "--extract",
            "order.id=orderId",
            "--extract",
            "node-set://o:item=items",
            "--format",
            "json",
        ],
    );
    assert_eq!(output.status.code(), Some(0), "{}", stdout(&output));

    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["status"], "success");
    assert_eq!(json["variables"]["orderId"], "42");
    assert_eq!(json["variables"]["items"], "bolt,nut");
}

#[test]
fn test_cli_lenient_failures_exit_with_failure() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "order.xml", ORDER_XML);

    let output = xml_assert(
        dir.path(),
        &["order.xml", "--lenient", "--xpath", "//missing=anything"],
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stdout(&output)
            .contains("XPath assertion failure - //missing : expected = anything, actual = ")
    );

    let output = xml_assert(dir.path(), &["order.xml", "--xpath", "//missing=anything"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("expression-evaluation"));
}

#[test]
fn test_cli_usage_errors_exit_with_two() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "order.xml", ORDER_XML);

    let output = xml_assert(dir.path(), &["missing.xml", "--xpath", "//a=b"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("does not exist"));

    let output = xml_assert(dir.path(), &["order.xml"]);
    assert_eq!(output.status.code(), Some(2));

    let output = xml_assert(dir.path(), &["order.xml", "--xpath", "//a[=b"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_cli_config_file_and_environment() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "received.xml", "<root><a>X</a><b>Y</b></root>");
    write_file(dir.path(), "control.xml", "<root><a>Z</a><b>Y</b></root>");
    write_file(
        dir.path(),
        "xml-assert.toml",
        "[validation]\nignore = [\"root.a\"]\n",
    );

    let output = xml_assert(dir.path(), &["received.xml", "--control", "control.xml"]);
    assert_eq!(output.status.code(), Some(0), "{}", stdout(&output));

    let output = Command::new(env!("CARGO_BIN_EXE_xml-assert"))
        .args(["received.xml", "--control", "control.xml"])
        .current_dir(dir.path())
        .env("XML_ASSERT_FORMAT", "xml")
        .output()
        .expect("Failed to execute command");
    assert_eq!(output.status.code(), Some(2));
}

#[cfg(feature = "libxml2")]
#[test]
fn test_cli_schema_validation() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "orders.xsd", common::test_helpers::ORDER_XSD);
    write_file(dir.path(), "order.xml", ORDER_XML);
    write_file(dir.path(), "invalid.xml", INVALID_ORDER_XML);
    write_file(dir.path(), "control.xml", ORDER_CONTROL_XML);

    let output = xml_assert(
        dir.path(),
        &["order.xml", "--control", "control.xml", "--schema", "orders.xsd"],
    );
    assert_eq!(output.status.code(), Some(0), "{}", stdout(&output));

    let output = xml_assert(
        dir.path(),
        &["invalid.xml", "--control", "control.xml", "--schema", "orders.xsd"],
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("schema-validation"));

    let output = xml_assert(
        dir.path(),
        &[
            "invalid.xml",
            "--control",
            "invalid.xml",
            "--schema",
            "orders.xsd",
            "--no-schema-validation",
        ],
    );
    assert_eq!(output.status.code(), Some(0), "{}", stdout(&output));
}
