use std::collections::BTreeMap;
use std::sync::Arc;

use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWrite;

use crate::body::RequestBody;
use crate::config::Config;
use crate::error::Error;
use crate::option::RequestOption;
use crate::transport::Transport;

/// Destination for a JSON-decoded response body.
///
/// Implemented for every `DeserializeOwned` type; on success the target is
/// replaced by the decoded value.
pub trait JsonTarget: Send {
    fn decode_json(&mut self, body: &[u8]) -> serde_json::Result<()>;
}

impl<T> JsonTarget for T
where
    T: DeserializeOwned + Send,
{
    fn decode_json(&mut self, body: &[u8]) -> serde_json::Result<()> {
        *self = serde_json::from_slice(body)?;
        Ok(())
    }
}

/// Byte sink receiving the raw response body.
pub type CopyTarget<'a> = dyn AsyncWrite + Send + Unpin + 'a;

/// Everything one execution needs, assembled by applying options in order.
pub(crate) struct RequestConfig<'a> {
    pub(crate) config: Config,
    pub(crate) config_overridden: bool,
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) query: BTreeMap<String, String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<RequestBody>,
    pub(crate) retry_times: usize,
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) json_target: Option<&'a mut dyn JsonTarget>,
    pub(crate) copy_target: Option<&'a mut CopyTarget<'a>>,
    pub(crate) error_on_status: bool,
    pub(crate) errors: Vec<Error>,
}

impl std::fmt::Debug for RequestConfig<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestConfig")
            .field("config", &self.config)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("retry_times", &self.retry_times)
            .field("custom_transport", &self.transport.is_some())
            .field("json_target", &self.json_target.is_some())
            .field("copy_target", &self.copy_target.is_some())
            .field("error_on_status", &self.error_on_status)
            .field("errors", &self.errors)
            .finish()
    }
}

impl<'a> RequestConfig<'a> {
    pub(crate) fn new(config: Config, method: Method, url: &str) -> Self {
        Self {
            config,
            config_overridden: false,
            method,
            url: url.to_owned(),
            query: BTreeMap::new(),
            headers: HeaderMap::new(),
            body: None,
            retry_times: 0,
            transport: None,
            json_target: None,
            copy_target: None,
            error_on_status: true,
            errors: Vec::new(),
        }
    }

    pub(crate) fn build<I>(config: Config, method: Method, url: &str, options: I) -> Self
    where
        I: IntoIterator<Item = RequestOption<'a>>,
    {
        let mut request = Self::new(config, method, url);
        for option in options {
            option.apply(&mut request);
        }
        request
    }

    pub(crate) fn push_error(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub(crate) fn set_body(&mut self, body: RequestBody, content_type: Option<HeaderValue>) {
        self.body = Some(body);
        if let Some(content_type) = content_type {
            self.headers.insert(CONTENT_TYPE, content_type);
        }
    }

    pub(crate) fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }
}

#[cfg(test)]
impl RequestConfig<'_> {
    pub(crate) fn method(&self) -> &Method {
        &self.method
    }

    pub(crate) fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    pub(crate) fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn retry_times(&self) -> usize {
        self.retry_times
    }

    pub(crate) fn error_on_status(&self) -> bool {
        self.error_on_status
    }

    pub(crate) fn errors(&self) -> &[Error] {
        &self.errors
    }
}
