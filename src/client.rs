use std::sync::Arc;

use http::{Method, Response, Uri};
use tracing::{Instrument, debug, info_span, warn};

use crate::body::{RequestBody, RespBody, build_http_request, empty_req_body};
use crate::config::Config;
use crate::disposition::{Targets, dispose};
use crate::error::Error;
use crate::option::RequestOption;
use crate::request::RequestConfig;
use crate::response::{Exchange, RequestHead};
use crate::transport::{HyperTransport, Transport};
use crate::util::{redact_uri_for_logs, resolve_url};

/// Executes requests with a shared configuration and transport.
///
/// Cloning is cheap; clones share the connection pool of the transport.
#[derive(Clone)]
pub struct Client {
    config: Config,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Builds a client whose default transport follows `config`.
    pub fn new(config: Config) -> crate::Result<Self> {
        let transport = HyperTransport::new(&config)?;
        Ok(Self {
            config,
            transport: Arc::new(transport),
        })
    }

    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sends `method` to `url` after applying `options` in order.
    ///
    /// Transport failures are retried up to the configured retry count. Any
    /// response ends the loop, whatever its status.
    pub async fn execute<'a>(
        &self,
        method: Method,
        url: &str,
        options: Vec<RequestOption<'a>>,
    ) -> crate::Result<Exchange> {
        let request = RequestConfig::build(self.config.clone(), method, url, options);
        run(request, Some(&self.transport)).await
    }

    pub async fn get<'a>(
        &self,
        url: &str,
        options: Vec<RequestOption<'a>>,
    ) -> crate::Result<Exchange> {
        self.execute(Method::GET, url, options).await
    }

    pub async fn post<'a>(
        &self,
        url: &str,
        options: Vec<RequestOption<'a>>,
    ) -> crate::Result<Exchange> {
        self.execute(Method::POST, url, options).await
    }

    pub async fn put<'a>(
        &self,
        url: &str,
        options: Vec<RequestOption<'a>>,
    ) -> crate::Result<Exchange> {
        self.execute(Method::PUT, url, options).await
    }

    pub async fn patch<'a>(
        &self,
        url: &str,
        options: Vec<RequestOption<'a>>,
    ) -> crate::Result<Exchange> {
        self.execute(Method::PATCH, url, options).await
    }

    pub async fn delete<'a>(
        &self,
        url: &str,
        options: Vec<RequestOption<'a>>,
    ) -> crate::Result<Exchange> {
        self.execute(Method::DELETE, url, options).await
    }

    pub async fn head<'a>(
        &self,
        url: &str,
        options: Vec<RequestOption<'a>>,
    ) -> crate::Result<Exchange> {
        self.execute(Method::HEAD, url, options).await
    }

    pub async fn options<'a>(
        &self,
        url: &str,
        options: Vec<RequestOption<'a>>,
    ) -> crate::Result<Exchange> {
        self.execute(Method::OPTIONS, url, options).await
    }

    pub async fn trace<'a>(
        &self,
        url: &str,
        options: Vec<RequestOption<'a>>,
    ) -> crate::Result<Exchange> {
        self.execute(Method::TRACE, url, options).await
    }

    pub async fn connect<'a>(
        &self,
        url: &str,
        options: Vec<RequestOption<'a>>,
    ) -> crate::Result<Exchange> {
        self.execute(Method::CONNECT, url, options).await
    }
}

/// Like [`Client::execute`], with a fresh default [`Config`] and transport.
pub async fn execute<'a>(
    method: Method,
    url: &str,
    options: Vec<RequestOption<'a>>,
) -> crate::Result<Exchange> {
    let request = RequestConfig::build(Config::default(), method, url, options);
    run(request, None).await
}

pub async fn get<'a>(url: &str, options: Vec<RequestOption<'a>>) -> crate::Result<Exchange> {
    execute(Method::GET, url, options).await
}

pub async fn post<'a>(url: &str, options: Vec<RequestOption<'a>>) -> crate::Result<Exchange> {
    execute(Method::POST, url, options).await
}

pub async fn put<'a>(url: &str, options: Vec<RequestOption<'a>>) -> crate::Result<Exchange> {
    execute(Method::PUT, url, options).await
}

pub async fn patch<'a>(url: &str, options: Vec<RequestOption<'a>>) -> crate::Result<Exchange> {
    execute(Method::PATCH, url, options).await
}

pub async fn delete<'a>(url: &str, options: Vec<RequestOption<'a>>) -> crate::Result<Exchange> {
    execute(Method::DELETE, url, options).await
}

pub async fn head<'a>(url: &str, options: Vec<RequestOption<'a>>) -> crate::Result<Exchange> {
    execute(Method::HEAD, url, options).await
}

pub async fn options<'a>(url: &str, options: Vec<RequestOption<'a>>) -> crate::Result<Exchange> {
    execute(Method::OPTIONS, url, options).await
}

pub async fn trace<'a>(url: &str, options: Vec<RequestOption<'a>>) -> crate::Result<Exchange> {
    execute(Method::TRACE, url, options).await
}

pub async fn connect<'a>(url: &str, options: Vec<RequestOption<'a>>) -> crate::Result<Exchange> {
    execute(Method::CONNECT, url, options).await
}

async fn run(
    request: RequestConfig<'_>,
    shared_transport: Option<&Arc<dyn Transport>>,
) -> crate::Result<Exchange> {
    let RequestConfig {
        config,
        config_overridden,
        method,
        url,
        query,
        headers,
        body,
        retry_times,
        transport,
        json_target,
        copy_target,
        error_on_status,
        errors,
    } = request;

    if !errors.is_empty() {
        return Err(Error::Config { errors });
    }
    let uri = resolve_url(&url, &query)?;
    let transport: Arc<dyn Transport> = match (transport, shared_transport) {
        (Some(transport), _) => transport,
        (None, Some(shared)) if !config_overridden => Arc::clone(shared),
        (None, _) => Arc::new(HyperTransport::new(&config)?),
    };

    let max_attempts = retry_times.saturating_add(1);
    let redacted_uri = redact_uri_for_logs(&uri.to_string());
    let span = info_span!(
        "reqkit.request",
        method = %method,
        uri = %redacted_uri,
        max_attempts = max_attempts
    );

    async move {
        let mut attempt = 1_usize;
        let (request_head, response) = loop {
            debug!(attempt, "sending request");
            let outcome = send_attempt(
                transport.as_ref(),
                &method,
                &uri,
                &headers,
                body.as_ref(),
            )
            .await;
            match outcome {
                Ok(exchange) => break exchange,
                Err(error) if attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        error = %error,
                        "retrying request after transport error"
                    );
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        };

        let targets = Targets {
            error_on_status,
            json: json_target,
            copy: copy_target,
        };
        let response_head = dispose(response, targets, &method, &redacted_uri).await?;
        Ok(Exchange::new(request_head, response_head, attempt))
    }
    .instrument(span)
    .await
}

async fn send_attempt(
    transport: &dyn Transport,
    method: &Method,
    uri: &Uri,
    headers: &http::HeaderMap,
    body: Option<&RequestBody>,
) -> crate::Result<(RequestHead, Response<RespBody>)> {
    let body = match body {
        Some(body) => body.open().map_err(|source| Error::Body { source })?,
        None => empty_req_body(),
    };
    let request = build_http_request(method.clone(), uri.clone(), headers, body)?;
    let head = RequestHead {
        method: request.method().clone(),
        uri: request.uri().clone(),
        headers: request.headers().clone(),
    };
    let response = transport.execute(request).await?;
    Ok((head, response))
}
