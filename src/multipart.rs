use std::io::Read;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::Error;

/// A file to attach to a multipart upload under `field_name`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormFile {
    pub field_name: String,
    pub path: PathBuf,
}

impl FormFile {
    pub fn new(field_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            field_name: field_name.into(),
            path: path.into(),
        }
    }
}

/// Incrementally written `multipart/form-data` payload.
pub(crate) struct MultipartWriter {
    boundary: String,
    buffer: Vec<u8>,
}

impl MultipartWriter {
    pub(crate) fn new() -> Self {
        Self::with_boundary(random_boundary())
    }

    pub(crate) fn with_boundary(boundary: String) -> Self {
        Self {
            boundary,
            buffer: Vec::new(),
        }
    }

    pub(crate) fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn begin_part(&mut self, headers: &[(&str, String)]) {
        if self.buffer.is_empty() {
            self.buffer
                .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        } else {
            self.buffer
                .extend_from_slice(format!("\r\n--{}\r\n", self.boundary).as_bytes());
        }
        for (name, value) in headers {
            self.buffer
                .extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        self.buffer.extend_from_slice(b"\r\n");
    }

    /// Copies the file at `path` into a new part. The file is closed before
    /// this returns, whether or not the copy succeeded.
    pub(crate) fn write_file(&mut self, field_name: &str, path: &Path) -> Result<(), Error> {
        let file_error = |source| Error::File {
            path: path.to_path_buf(),
            source,
        };
        let mut contents = Vec::new();
        {
            let mut file = std::fs::File::open(path).map_err(file_error)?;
            file.read_to_end(&mut contents).map_err(file_error)?;
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.begin_part(&[
            (
                "Content-Disposition",
                format!(
                    "form-data; name=\"{}\"; filename=\"{}\"",
                    escape_quotes(field_name),
                    escape_quotes(&file_name)
                ),
            ),
            ("Content-Type", "application/octet-stream".to_owned()),
        ]);
        self.buffer.extend_from_slice(&contents);
        Ok(())
    }

    pub(crate) fn write_field(&mut self, name: &str, value: &str) {
        self.begin_part(&[(
            "Content-Disposition",
            format!("form-data; name=\"{}\"", escape_quotes(name)),
        )]);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    pub(crate) fn finish(mut self) -> Bytes {
        if !self.buffer.is_empty() {
            self.buffer.extend_from_slice(b"\r\n");
        }
        self.buffer
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Bytes::from(self.buffer)
    }
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn random_boundary() -> String {
    let bytes: [u8; 30] = std::array::from_fn(|_| rand::random::<u8>());
    encode_hex_lower(&bytes)
}

fn encode_hex_lower(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut encoded = String::with_capacity(bytes.len().saturating_mul(2));
    for byte in bytes {
        encoded.push(HEX[(byte >> 4) as usize] as char);
        encoded.push(HEX[(byte & 0x0f) as usize] as char);
    }
    encoded
}
