use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::Uri;
use http::header::HeaderValue;
use hyper::rt::{Read as HyperRead, ReadBufCursor, Write as HyperWrite};
use hyper_util::client::legacy::connect::proxy::Tunnel;
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tower_service::Service;

use crate::config::{ProxyConfig, Timeouts};
use crate::conn::{DeadlineElapsed, TimeoutConnection};
use crate::error::{Error, TimeoutPhase};

pub(crate) type BoxConnectError = Box<dyn StdError + Send + Sync>;

type Connecting =
    Pin<Box<dyn Future<Output = Result<TokioIo<TcpStream>, BoxConnectError>> + Send>>;

/// Proxy endpoint resolved from [`ProxyConfig`].
#[derive(Clone, Debug)]
pub(crate) struct ProxyTarget {
    pub(crate) uri: Uri,
    pub(crate) authorization: Option<HeaderValue>,
}

impl ProxyTarget {
    pub(crate) fn from_config(config: &ProxyConfig) -> crate::Result<Self> {
        let invalid = |reason: String| Error::InvalidProxy {
            url: config.url.clone(),
            reason,
        };
        let parsed = url::Url::parse(&config.url).map_err(|source| invalid(source.to_string()))?;
        if parsed.scheme() != "http" || parsed.host_str().is_none() {
            return Err(invalid("proxy url must use http and name a host".to_owned()));
        }
        let uri = parsed
            .as_str()
            .parse::<Uri>()
            .map_err(|source| invalid(source.to_string()))?;

        let authorization = match (&config.username, &config.password) {
            (None, None) => None,
            (username, password) => Some(basic_authorization(
                username.as_deref().unwrap_or_default(),
                password.as_deref().unwrap_or_default(),
            )?),
        };
        Ok(Self { uri, authorization })
    }
}

/// `Basic base64(user:password)` credentials, marked sensitive.
pub(crate) fn basic_authorization(username: &str, password: &str) -> crate::Result<HeaderValue> {
    let encoded = STANDARD.encode(format!("{username}:{password}"));
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}")).map_err(|source| {
        Error::InvalidHeaderValue {
            name: "authorization".to_owned(),
            source,
        }
    })?;
    value.set_sensitive(true);
    Ok(value)
}

#[derive(Debug)]
pub struct ProxyConnection<T> {
    inner: T,
    proxied: bool,
}

impl<T> ProxyConnection<T> {
    fn new(inner: T, proxied: bool) -> Self {
        Self { inner, proxied }
    }
}

impl<T> HyperRead for ProxyConnection<T>
where
    T: HyperRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_read(cx, buf)
    }
}

impl<T> HyperWrite for ProxyConnection<T>
where
    T: HyperWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_shutdown(cx)
    }
}

impl<T> Connection for ProxyConnection<T>
where
    T: Connection,
{
    fn connected(&self) -> Connected {
        self.inner.connected().proxy(self.proxied)
    }
}

#[derive(Clone)]
struct ProxyRuntime {
    tunnel: Tunnel<HttpConnector>,
    proxy_uri: Uri,
}

/// Dial hook of the default transport.
///
/// Opens the TCP stream directly, to the proxy (plain http targets) or through
/// a CONNECT tunnel (https targets), bounds the whole dial by the connect
/// timeout, then hands the stream to a [`TimeoutConnection`].
#[derive(Clone)]
pub struct Dialer {
    direct: HttpConnector,
    proxy: Option<ProxyRuntime>,
    timeouts: Timeouts,
}

impl Dialer {
    pub(crate) fn new(proxy: Option<ProxyTarget>, timeouts: Timeouts) -> Self {
        let mut direct = HttpConnector::new();
        direct.enforce_http(false);
        direct.set_nodelay(true);
        let proxy = proxy.map(|target| {
            let mut tunnel = Tunnel::new(target.uri.clone(), direct.clone());
            if let Some(authorization) = target.authorization {
                tunnel = tunnel.with_auth(authorization);
            }
            ProxyRuntime {
                tunnel,
                proxy_uri: target.uri,
            }
        });
        Self {
            direct,
            proxy,
            timeouts,
        }
    }
}

impl Service<Uri> for Dialer {
    type Response = ProxyConnection<TimeoutConnection<TokioIo<TcpStream>>>;
    type Error = BoxConnectError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let direct_ready = match self.direct.poll_ready(cx) {
            Poll::Ready(Ok(())) => true,
            Poll::Ready(Err(error)) => return Poll::Ready(Err(Box::new(error))),
            Poll::Pending => false,
        };
        let tunnel_ready = match &mut self.proxy {
            Some(proxy) => match proxy.tunnel.poll_ready(cx) {
                Poll::Ready(Ok(())) => true,
                Poll::Ready(Err(error)) => return Poll::Ready(Err(Box::new(error))),
                Poll::Pending => false,
            },
            None => true,
        };
        if direct_ready && tunnel_ready {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let (connecting, proxied): (Connecting, bool) = match &mut self.proxy {
            Some(proxy) if is_https(&dst) => {
                let tunneling = proxy.tunnel.call(normalize_tunnel_target_uri(dst));
                (
                    Box::pin(async move {
                        tunneling
                            .await
                            .map_err(|error| Box::new(error) as BoxConnectError)
                    }),
                    false,
                )
            }
            Some(proxy) => {
                let connecting = self.direct.call(proxy.proxy_uri.clone());
                (
                    Box::pin(async move {
                        connecting
                            .await
                            .map_err(|error| Box::new(error) as BoxConnectError)
                    }),
                    true,
                )
            }
            None => {
                let connecting = self.direct.call(dst);
                (
                    Box::pin(async move {
                        connecting
                            .await
                            .map_err(|error| Box::new(error) as BoxConnectError)
                    }),
                    false,
                )
            }
        };

        let timeouts = self.timeouts;
        Box::pin(async move {
            let stream = match timeouts.connect_limit() {
                Some(limit) => tokio::time::timeout(limit, connecting)
                    .await
                    .map_err(|_| {
                        Box::new(DeadlineElapsed::new(TimeoutPhase::Connect, limit))
                            as BoxConnectError
                    })??,
                None => connecting.await?,
            };
            Ok::<_, BoxConnectError>(ProxyConnection::new(
                TimeoutConnection::new(stream, timeouts),
                proxied,
            ))
        })
    }
}

fn is_https(uri: &Uri) -> bool {
    uri.scheme_str()
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https"))
}

pub(crate) fn normalize_tunnel_target_uri(dst: Uri) -> Uri {
    if dst.port().is_some() {
        return dst;
    }

    let Some(scheme) = dst.scheme_str() else {
        return dst;
    };
    let default_port = if scheme.eq_ignore_ascii_case("https") {
        443
    } else if scheme.eq_ignore_ascii_case("http") {
        80
    } else {
        return dst;
    };
    let Some(host) = dst.host() else {
        return dst;
    };
    let authority_text = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{default_port}")
    } else {
        format!("{host}:{default_port}")
    };

    let Ok(authority) = authority_text.parse() else {
        return dst;
    };
    let original = dst.clone();
    let mut parts = dst.into_parts();
    parts.authority = Some(authority);
    Uri::from_parts(parts).unwrap_or(original)
}
