use std::path::PathBuf;
use std::time::Duration;

use http::Method;
use thiserror::Error;

use crate::conn::DeadlineElapsed;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// The connection phase whose deadline fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeoutPhase {
    Connect,
    Read,
    Write,
    ResponseHeader,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Connect => "connect",
            Self::Read => "read",
            Self::Write => "write",
            Self::ResponseHeader => "response_header",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    Config,
    InvalidUrl,
    InvalidProxy,
    SerializeJson,
    SerializeForm,
    InvalidHeaderName,
    InvalidHeaderValue,
    File,
    MissingFiles,
    Body,
    RequestBuild,
    Transport,
    Timeout,
    TlsConfig,
    HttpStatus,
    Deserialize,
    ReadBody,
    WriteBody,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::InvalidUrl => "invalid_url",
            Self::InvalidProxy => "invalid_proxy",
            Self::SerializeJson => "serialize_json",
            Self::SerializeForm => "serialize_form",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::File => "file",
            Self::MissingFiles => "missing_files",
            Self::Body => "body",
            Self::RequestBuild => "request_build",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::TlsConfig => "tls_config",
            Self::HttpStatus => "http_status",
            Self::Deserialize => "deserialize",
            Self::ReadBody => "read_body",
            Self::WriteBody => "write_body",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Every error raised while applying request options, in application order.
    #[error("{}", join_messages(.errors))]
    Config { errors: Vec<Error> },
    #[error("invalid request url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid proxy url {url}: {reason}")]
    InvalidProxy { url: String, reason: String },
    #[error("failed to serialize request json: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize request form: {source}")]
    SerializeForm {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to read upload file {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no file found")]
    MissingFiles,
    #[error("failed to open request body: {source}")]
    Body {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("http request timed out in {phase} after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        phase: TimeoutPhase,
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("invalid tls configuration: {message}")]
    TlsConfig { message: String },
    /// The final response carried a non-success status; the message is the response body.
    #[error("{body}")]
    HttpStatus { status: u16, body: String },
    #[error("failed to decode response json: {source}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("failed to copy response body: {source}")]
    WriteBody {
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Config { .. } => ErrorCode::Config,
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::InvalidProxy { .. } => ErrorCode::InvalidProxy,
            Self::SerializeJson { .. } => ErrorCode::SerializeJson,
            Self::SerializeForm { .. } => ErrorCode::SerializeForm,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::File { .. } => ErrorCode::File,
            Self::MissingFiles => ErrorCode::MissingFiles,
            Self::Body { .. } => ErrorCode::Body,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::TlsConfig { .. } => ErrorCode::TlsConfig,
            Self::HttpStatus { .. } => ErrorCode::HttpStatus,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::WriteBody { .. } => ErrorCode::WriteBody,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub(crate) fn timeout(
        phase: TimeoutPhase,
        timeout: Duration,
        method: &Method,
        uri: &str,
    ) -> Self {
        Self::Timeout {
            phase,
            timeout_ms: timeout.as_millis(),
            method: method.clone(),
            uri: uri.to_owned(),
        }
    }
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Finds a connection deadline anywhere in an error's source chain.
pub(crate) fn find_deadline<'a>(
    error: &'a (dyn std::error::Error + 'static),
) -> Option<&'a DeadlineElapsed> {
    let mut current = Some(error);
    while let Some(error) = current {
        if let Some(deadline) = error.downcast_ref::<DeadlineElapsed>() {
            return Some(deadline);
        }
        if let Some(deadline) = error
            .downcast_ref::<std::io::Error>()
            .and_then(|io_error| io_error.get_ref())
            .and_then(|inner| inner.downcast_ref::<DeadlineElapsed>())
        {
            return Some(deadline);
        }
        current = error.source();
    }
    None
}
