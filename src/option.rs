//! Request options.
//!
//! Each option is a small mutator over the request configuration, applied in the order
//! given. Later options win when they touch the same field. An option that
//! fails records its error on the configuration and leaves everything else
//! untouched; the recorded errors abort execution before any network I/O.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use http::header::{AUTHORIZATION, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::body::RequestBody;
use crate::config::Config;
use crate::error::Error;
use crate::multipart::{FormFile, MultipartWriter};
use crate::proxy::basic_authorization;
use crate::request::{CopyTarget, JsonTarget, RequestConfig};
use crate::transport::Transport;
use crate::util::{encode_pairs, key_value_pairs, parse_header_name, parse_header_value};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

type ApplyFn<'a> = dyn FnOnce(&mut RequestConfig<'a>) + Send + 'a;

pub struct RequestOption<'a> {
    apply: Box<ApplyFn<'a>>,
}

impl std::fmt::Debug for RequestOption<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("RequestOption")
    }
}

impl<'a> RequestOption<'a> {
    pub(crate) fn new<F>(apply: F) -> Self
    where
        F: FnOnce(&mut RequestConfig<'a>) + Send + 'a,
    {
        Self {
            apply: Box::new(apply),
        }
    }

    pub(crate) fn apply(self, request: &mut RequestConfig<'a>) {
        (self.apply)(request);
    }
}

/// Replaces the transport defaults for this request only.
pub fn with_config<'a>(config: Config) -> RequestOption<'a> {
    RequestOption::new(move |request| {
        request.config = config;
        request.config_overridden = true;
    })
}

pub fn with_method<'a>(method: Method) -> RequestOption<'a> {
    RequestOption::new(move |request| request.method = method)
}

/// Number of extra attempts after a transport failure; `0` sends once.
pub fn with_retry_times<'a>(retry_times: usize) -> RequestOption<'a> {
    RequestOption::new(move |request| request.retry_times = retry_times)
}

pub fn with_transport<'a>(transport: Arc<dyn Transport>) -> RequestOption<'a> {
    RequestOption::new(move |request| request.transport = Some(transport))
}

/// Whether a final status of 300 or above is returned as [`Error::HttpStatus`].
pub fn with_error_on_status<'a>(enabled: bool) -> RequestOption<'a> {
    RequestOption::new(move |request| request.error_on_status = enabled)
}

/// Decodes the response body as JSON into `target`.
pub fn with_response_json<'a, T>(target: &'a mut T) -> RequestOption<'a>
where
    T: DeserializeOwned + Send,
{
    RequestOption::new(move |request| {
        let target: &'a mut dyn JsonTarget = target;
        request.json_target = Some(target);
    })
}

/// Copies the raw response body into `target`.
pub fn with_response_copy<'a, W>(target: &'a mut W) -> RequestOption<'a>
where
    W: AsyncWrite + Send + Unpin + 'a,
{
    RequestOption::new(move |request| {
        let target: &'a mut CopyTarget<'a> = target;
        request.copy_target = Some(target);
    })
}

/// Sets query parameters from a flat `key, value, ..` list.
pub fn with_query<'a, I, S>(pairs: I) -> RequestOption<'a>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let pairs = key_value_pairs(pairs);
    RequestOption::new(move |request| request.query.extend(pairs))
}

/// Sets headers from a flat `name, value, ..` list.
pub fn with_header<'a, I, S>(pairs: I) -> RequestOption<'a>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let pairs = key_value_pairs(pairs);
    RequestOption::new(move |request| {
        let mut parsed = Vec::with_capacity(pairs.len());
        for (name, value) in &pairs {
            let header = parse_header_name(name)
                .and_then(|header| Ok((header, parse_header_value(name, value)?)));
            match header {
                Ok(header) => parsed.push(header),
                Err(error) => {
                    request.push_error(error);
                    return;
                }
            }
        }
        for (name, value) in parsed {
            request.set_header(name, value);
        }
    })
}

pub fn with_basic_auth<'a>(
    username: impl Into<String>,
    password: impl Into<String>,
) -> RequestOption<'a> {
    let username = username.into();
    let password = password.into();
    RequestOption::new(move |request| match basic_authorization(&username, &password) {
        Ok(value) => request.set_header(AUTHORIZATION, value),
        Err(error) => request.push_error(error),
    })
}

/// Sends a url-encoded form built from a flat `key, value, ..` list.
pub fn with_form<'a, I, S>(pairs: I) -> RequestOption<'a>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let fields: BTreeMap<String, String> = key_value_pairs(pairs).into_iter().collect();
    let encoded = encode_pairs(&fields);
    RequestOption::new(move |request| {
        request.set_body(
            RequestBody::Buffered(Bytes::from(encoded)),
            Some(HeaderValue::from_static(FORM_CONTENT_TYPE)),
        );
    })
}

/// Sends `payload` url-encoded through `serde_urlencoded`.
pub fn with_form_serialized<'a, T>(payload: &T) -> RequestOption<'a>
where
    T: Serialize + ?Sized,
{
    let encoded =
        serde_urlencoded::to_string(payload).map_err(|source| Error::SerializeForm { source });
    RequestOption::new(move |request| match encoded {
        Ok(encoded) => request.set_body(
            RequestBody::Buffered(Bytes::from(encoded)),
            Some(HeaderValue::from_static(FORM_CONTENT_TYPE)),
        ),
        Err(error) => request.push_error(error),
    })
}

pub fn with_json<'a, T>(payload: &T) -> RequestOption<'a>
where
    T: Serialize + ?Sized,
{
    json_option(payload, false)
}

/// Like [`with_json`], with `<`, `>` and `&` escaped as `\u003c`, `\u003e` and `\u0026`.
pub fn with_json_escaped<'a, T>(payload: &T) -> RequestOption<'a>
where
    T: Serialize + ?Sized,
{
    json_option(payload, true)
}

fn json_option<'a, T>(payload: &T, escape_html: bool) -> RequestOption<'a>
where
    T: Serialize + ?Sized,
{
    let encoded = serde_json::to_vec(payload)
        .map(|body| {
            if escape_html {
                escape_html_in_json(&body)
            } else {
                body
            }
        })
        .map_err(|source| Error::SerializeJson { source });
    RequestOption::new(move |request| match encoded {
        Ok(body) => request.set_body(
            RequestBody::Buffered(Bytes::from(body)),
            Some(HeaderValue::from_static(JSON_CONTENT_TYPE)),
        ),
        Err(error) => request.push_error(error),
    })
}

// Serialized JSON only contains these bytes inside string literals.
pub(crate) fn escape_html_in_json(body: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(body.len());
    for byte in body {
        match byte {
            b'<' => escaped.extend_from_slice(b"\\u003c"),
            b'>' => escaped.extend_from_slice(b"\\u003e"),
            b'&' => escaped.extend_from_slice(b"\\u0026"),
            other => escaped.push(*other),
        }
    }
    escaped
}

/// Uploads `files` as `multipart/form-data`, followed by extra form fields
/// from a flat `key, value, ..` list.
pub fn with_files<'a, I, S>(files: Vec<FormFile>, fields: I) -> RequestOption<'a>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let fields = key_value_pairs(fields);
    RequestOption::new(move |request| {
        if files.is_empty() {
            request.push_error(Error::MissingFiles);
            return;
        }
        let mut writer = MultipartWriter::new();
        for file in &files {
            if let Err(error) = writer.write_file(&file.field_name, &file.path) {
                request.push_error(error);
                return;
            }
        }
        for (name, value) in &fields {
            writer.write_field(name, value);
        }
        let content_type = writer.content_type();
        match HeaderValue::from_str(&content_type) {
            Ok(content_type) => {
                request.set_body(RequestBody::Buffered(writer.finish()), Some(content_type));
            }
            Err(source) => request.push_error(Error::InvalidHeaderValue {
                name: "content-type".to_owned(),
                source,
            }),
        }
    })
}

/// Sends raw bytes. No content type is set.
pub fn with_body<'a>(body: impl Into<Bytes>) -> RequestOption<'a> {
    let body = body.into();
    RequestOption::new(move |request| request.set_body(RequestBody::Buffered(body), None))
}

/// Sends a streamed body. `open` is called once per attempt, so every retry
/// starts from a fresh reader.
pub fn with_body_factory<'a, F, R>(open: F) -> RequestOption<'a>
where
    F: Fn() -> io::Result<R> + Send + Sync + 'static,
    R: AsyncRead + Send + Sync + 'static,
{
    RequestOption::new(move |request| {
        request.set_body(RequestBody::from_reader_factory(open), None);
    })
}

/// Streams the file at `path`, reopening it for every attempt.
pub fn with_body_file<'a>(path: impl Into<PathBuf>) -> RequestOption<'a> {
    let path = path.into();
    RequestOption::new(move |request| request.set_body(RequestBody::from_file(path), None))
}
