//! LibXML2 FFI wrapper for XML Schema validation of in-memory payloads.
//!
//! No mature pure Rust XSD validator exists, so schema validation goes through
//! libxml2 directly. The wrapper keeps the unsafe surface small:
//!
//! - schemas are parsed from memory and held in an `Arc`-wrapped pointer freed on drop,
//! - every validation creates its own validation context, so a parsed schema can be
//!   shared by concurrent validations,
//! - schema parsing is not thread-safe in libxml2 and is serialized behind a lock,
//! - errors are collected through a structured error callback instead of stderr.

use std::ffi::CString;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use libc::{c_char, c_int};
use tracing::trace;

use crate::error::{LibXml2Error, LibXml2Result};

/// libxml2 initialization is not thread-safe and must happen exactly once.
static LIBXML2_INIT: Once = Once::new();

/// Serializes schema parsing, which libxml2 does not support concurrently.
static SCHEMA_PARSE_LOCK: Mutex<()> = Mutex::new(());

/// Disables network access while parsing received payloads.
const XML_PARSE_NONET: c_int = 1 << 11;

#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();
    pub fn xmlInitGlobals();

    pub fn xmlSchemaNewMemParserCtxt(
        buffer: *const c_char,
        size: c_int,
    ) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaNewParserCtxt(url: *const c_char) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaParse(ctxt: *const XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);

    pub fn xmlSchemaNewValidCtxt(schema: *const XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    pub fn xmlSchemaValidateDoc(ctxt: *const XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;
    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        sherr: XmlStructuredErrorFunc,
        ctx: *mut libc::c_void,
    );

    pub fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut libc::c_void,
    pub node: *mut libc::c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut libc::c_void, error: *mut xmlError)>;

/// Collects validation error messages, prefixed with their line number when known.
unsafe extern "C" fn structured_error_callback(user_data: *mut libc::c_void, error: *mut xmlError) {
    let errors = unsafe { &mut *(user_data as *mut Vec<String>) };

    if !error.is_null() {
        let msg_ptr = unsafe { (*error).message };
        let line = unsafe { (*error).line };
        if !msg_ptr.is_null() {
            let c_str = unsafe { std::ffi::CStr::from_ptr(msg_ptr) };
            if let Ok(s) = c_str.to_str() {
                let message = s.trim();
                if line > 0 {
                    errors.push(format!("line {}: {}", line, message));
                } else {
                    errors.push(message.to_string());
                }
            }
        }
    }
}

fn buffer_len(data: &[u8]) -> LibXml2Result<c_int> {
    c_int::try_from(data.len()).map_err(|_| LibXml2Error::BufferTooLarge { size: data.len() })
}

/// Shared, thread-safe handle to a parsed schema
#[derive(Debug, Clone)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: parsed xmlSchema structures are read-only during validation
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// # Safety
    ///
    /// `ptr` must come from `xmlSchemaParse` and must not be freed elsewhere.
    pub(crate) unsafe fn from_raw(ptr: *mut XmlSchema) -> LibXml2Result<Self> {
        if ptr.is_null() {
            return Err(LibXml2Error::SchemaParseFailed);
        }

        Ok(XmlSchemaPtr {
            inner: Arc::new(XmlSchemaInner {
                ptr,
                _phantom: PhantomData,
            }),
        })
    }

    pub(crate) fn as_ptr(&self) -> *const XmlSchema {
        self.inner.ptr
    }

    pub fn is_valid(&self) -> bool {
        !self.inner.ptr.is_null()
    }
}

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlSchemaFree(self.ptr);
            }
            self.ptr = std::ptr::null_mut();
        }
    }
}

/// Outcome of validating one payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Return code 0
    Valid,
    /// Return code > 0
    Invalid {
        error_count: i32,
        errors: Vec<String>,
    },
    /// Return code < 0
    InternalError { code: i32 },
}

impl ValidationResult {
    pub fn from_code(code: c_int, errors: Vec<String>) -> Self {
        match code {
            0 => ValidationResult::Valid,
            n if n > 0 => ValidationResult::Invalid {
                error_count: n,
                errors,
            },
            n => ValidationResult::InternalError { code: n },
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationResult::Invalid { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ValidationResult::InternalError { .. })
    }
}

/// Entry point to libxml2; creating one initializes the library once per process.
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            xmlInitGlobals();
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Parses an XSD document held in memory.
    pub fn parse_schema_from_memory(&self, schema_data: &[u8]) -> LibXml2Result<XmlSchemaPtr> {
        let size = buffer_len(schema_data)?;
        // A poisoned lock only means another parse panicked; libxml2 state is still usable
        let _guard = SCHEMA_PARSE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        unsafe {
            let parser_ctxt = xmlSchemaNewMemParserCtxt(schema_data.as_ptr() as *const c_char, size);
            Self::parse_schema(parser_ctxt)
        }
    }

    /// Parses an XSD file. Relative `schemaLocation`s of its imports and
    /// includes resolve against the file's directory.
    pub fn parse_schema_from_file(&self, path: &Path) -> LibXml2Result<XmlSchemaPtr> {
        let c_path = path
            .to_str()
            .and_then(|p| CString::new(p).ok())
            .ok_or_else(|| LibXml2Error::InvalidPath {
                path: path.to_path_buf(),
            })?;
        let _guard = SCHEMA_PARSE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        unsafe {
            let parser_ctxt = xmlSchemaNewParserCtxt(c_path.as_ptr());
            Self::parse_schema(parser_ctxt)
        }
    }

    /// Caller must hold `SCHEMA_PARSE_LOCK`.
    unsafe fn parse_schema(parser_ctxt: *mut XmlSchemaParserCtxt) -> LibXml2Result<XmlSchemaPtr> {
        if parser_ctxt.is_null() {
            return Err(LibXml2Error::MemoryAllocation);
        }

        unsafe {
            let schema_ptr = xmlSchemaParse(parser_ctxt);
            xmlSchemaFreeParserCtxt(parser_ctxt);

            if schema_ptr.is_null() {
                return Err(LibXml2Error::SchemaParseFailed);
            }
            XmlSchemaPtr::from_raw(schema_ptr)
        }
    }

    /// Validates an XML payload held in memory against a parsed schema.
    ///
    /// Safe to call concurrently: each call parses its own document and uses its
    /// own validation context.
    pub fn validate_memory(
        &self,
        schema: &XmlSchemaPtr,
        xml_content: &[u8],
    ) -> LibXml2Result<ValidationResult> {
        let size = buffer_len(xml_content)?;

        unsafe {
            let doc = xmlReadMemory(
                xml_content.as_ptr() as *const c_char,
                size,
                std::ptr::null(),
                std::ptr::null(),
                XML_PARSE_NONET,
            );
            if doc.is_null() {
                return Err(LibXml2Error::DocumentParseFailed);
            }

            let valid_ctxt = xmlSchemaNewValidCtxt(schema.as_ptr());
            if valid_ctxt.is_null() {
                xmlFreeDoc(doc);
                return Err(LibXml2Error::ValidationContextCreationFailed);
            }

            let mut errors = Vec::new();
            let errors_ptr = &mut errors as *mut Vec<String> as *mut libc::c_void;
            xmlSchemaSetValidStructuredErrors(valid_ctxt, Some(structured_error_callback), errors_ptr);

            let result_code = xmlSchemaValidateDoc(valid_ctxt, doc);

            xmlSchemaFreeValidCtxt(valid_ctxt);
            xmlFreeDoc(doc);

            trace!(result_code, errors = errors.len(), "libxml2 validation finished");
            match ValidationResult::from_code(result_code, errors) {
                ValidationResult::InternalError { code } => {
                    Err(LibXml2Error::ValidationFailed { code })
                }
                result => Ok(result),
            }
        }
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}
