use std::future::Future;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{Either, select};
use http::header::{HeaderValue, PROXY_AUTHORIZATION};
use http::{Request, Response, Uri};
use http_body_util::BodyExt;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::sync::Notify;
use tokio::time::sleep;

use crate::body::{ReqBody, RespBody, signal_on_end};
use crate::config::Config;
use crate::error::{BoxError, Error, TimeoutPhase};
use crate::proxy::{Dialer, ProxyTarget};
use crate::tls::build_tls_config;
use crate::util::{redact_uri_for_logs, transport_error};

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = crate::Result<Response<RespBody>>> + Send + 'a>>;

/// Performs one network round trip for a fully formed wire request.
///
/// Resolves once the response head is available; the body is read later by
/// the caller. Errors should be [`Error::Transport`] or [`Error::Timeout`].
pub trait Transport: Send + Sync {
    fn execute(&self, request: Request<ReqBody>) -> TransportFuture<'_>;
}

type HyperClient = Client<HttpsConnector<Dialer>, ReqBody>;

/// Default transport: hyper's pooled HTTP/1.1 client dialing through
/// [`Dialer`], with TLS from rustls.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    header_timeout: Option<Duration>,
    proxy_authorization: Option<HeaderValue>,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperTransport")
            .field("header_timeout", &self.header_timeout)
            .field("proxy_authorization", &self.proxy_authorization.is_some())
            .finish()
    }
}

impl HyperTransport {
    pub fn new(config: &Config) -> crate::Result<Self> {
        let proxy = config
            .proxy
            .as_ref()
            .map(ProxyTarget::from_config)
            .transpose()?;
        let proxy_authorization = proxy
            .as_ref()
            .and_then(|target| target.authorization.clone());
        let dialer = Dialer::new(proxy, config.timeouts);

        let tls_config = build_tls_config(config.insecure_skip_verify)?;
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(dialer);

        let mut builder = Client::builder(TokioExecutor::new());
        if !config.reuse_connections {
            builder.pool_max_idle_per_host(0);
        }
        Ok(Self {
            client: builder.build(https),
            header_timeout: config.timeouts.header_limit(),
            proxy_authorization,
        })
    }
}

impl Transport for HyperTransport {
    fn execute(&self, mut request: Request<ReqBody>) -> TransportFuture<'_> {
        // Plain http goes to the proxy in absolute form and needs the
        // credentials on the request itself; https carries them on CONNECT.
        if let Some(authorization) = &self.proxy_authorization
            && is_plain_http(request.uri())
            && !request.headers().contains_key(PROXY_AUTHORIZATION)
        {
            request
                .headers_mut()
                .insert(PROXY_AUTHORIZATION, authorization.clone());
        }

        let method = request.method().clone();
        let uri = redact_uri_for_logs(&request.uri().to_string());
        let header_timeout = self.header_timeout;
        let sent = Arc::new(Notify::new());
        let request = match header_timeout {
            Some(_) => request.map(|body| signal_on_end(body, Arc::clone(&sent))),
            None => request,
        };
        let responding = self.client.request(request);

        Box::pin(async move {
            let response = match header_timeout {
                // The header window opens once the request body has been fully sent.
                Some(limit) => {
                    let header_deadline = async {
                        sent.notified().await;
                        sleep(limit).await;
                    };
                    match select(pin!(responding), pin!(header_deadline)).await {
                        Either::Left((response, _)) => response,
                        Either::Right(((), _)) => {
                            return Err(Error::timeout(
                                TimeoutPhase::ResponseHeader,
                                limit,
                                &method,
                                &uri,
                            ));
                        }
                    }
                }
                None => responding.await,
            };
            let response = response.map_err(|error| transport_error(error, &method, &uri))?;
            Ok(response.map(|body| {
                body.map_err(|error| Box::new(error) as BoxError)
                    .boxed_unsync()
            }))
        })
    }
}

fn is_plain_http(uri: &Uri) -> bool {
    uri.scheme_str()
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("http"))
}
