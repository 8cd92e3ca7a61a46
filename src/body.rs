use std::convert::Infallible;
use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::combinators::{BoxBody, UnsyncBoxBody};
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Body, Frame, SizeHint};
use tokio::io::AsyncRead;
use tokio::sync::Notify;
use tokio_util::io::ReaderStream;

use crate::error::{BoxError, Error};

/// Body type sent on the wire for each attempt.
pub type ReqBody = BoxBody<Bytes, BoxError>;
/// Body type handed back by a [`crate::Transport`].
pub type RespBody = UnsyncBoxBody<Bytes, BoxError>;

type OpenBody = dyn Fn() -> io::Result<ReqBody> + Send + Sync;

/// A request body that can be replayed: every attempt opens a fresh stream.
#[derive(Clone)]
pub(crate) enum RequestBody {
    Buffered(Bytes),
    Factory(Arc<OpenBody>),
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(bytes) => formatter
                .debug_tuple("Buffered")
                .field(&bytes.len())
                .finish(),
            Self::Factory(_) => formatter.write_str("Factory"),
        }
    }
}

impl RequestBody {
    pub(crate) fn from_reader_factory<F, R>(open: F) -> Self
    where
        F: Fn() -> io::Result<R> + Send + Sync + 'static,
        R: AsyncRead + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(move || {
            open().map(|reader| stream_req_body(ReaderStream::new(reader)))
        }))
    }

    pub(crate) fn from_file(path: PathBuf) -> Self {
        Self::from_reader_factory(move || {
            std::fs::File::open(&path).map(tokio::fs::File::from_std)
        })
    }

    pub(crate) fn open(&self) -> io::Result<ReqBody> {
        match self {
            Self::Buffered(bytes) => Ok(buffered_req_body(bytes.clone())),
            Self::Factory(open) => open(),
        }
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> Option<&Bytes> {
        match self {
            Self::Buffered(bytes) => Some(bytes),
            Self::Factory(_) => None,
        }
    }
}

fn map_infallible_to_box_error(never: Infallible) -> BoxError {
    match never {}
}

pub(crate) fn empty_req_body() -> ReqBody {
    buffered_req_body(Bytes::new())
}

pub(crate) fn buffered_req_body(body: Bytes) -> ReqBody {
    Full::new(body).map_err(map_infallible_to_box_error).boxed()
}

pub(crate) fn stream_req_body<S, E>(stream: S) -> ReqBody
where
    S: Stream<Item = Result<Bytes, E>> + Send + Sync + 'static,
    E: StdError + Send + Sync + 'static,
{
    BodyExt::boxed(StreamBody::new(stream.map(|item| {
        item.map(Frame::data)
            .map_err(|error| Box::new(error) as BoxError)
    })))
}

/// Request body that notifies `sent` once its last frame has been handed out.
struct SignalOnEnd {
    inner: ReqBody,
    sent: Arc<Notify>,
}

impl Body for SignalOnEnd {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        if let Poll::Ready(None) = polled {
            self.sent.notify_one();
        }
        polled
    }

    // hyper stops polling once this reports true, so the signal fires here too.
    fn is_end_stream(&self) -> bool {
        let ended = self.inner.is_end_stream();
        if ended {
            self.sent.notify_one();
        }
        ended
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

pub(crate) fn signal_on_end(body: ReqBody, sent: Arc<Notify>) -> ReqBody {
    BodyExt::boxed(SignalOnEnd { inner: body, sent })
}

pub(crate) fn build_http_request(
    method: Method,
    uri: Uri,
    headers: &HeaderMap,
    body: ReqBody,
) -> Result<Request<ReqBody>, Error> {
    let mut request_builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request_builder = request_builder.header(name, value);
    }
    request_builder
        .body(body)
        .map_err(|source| Error::RequestBuild { source })
}

pub(crate) async fn read_all_body(body: RespBody) -> Result<Bytes, BoxError> {
    Ok(body.collect().await?.to_bytes())
}

/// Wraps fully buffered bytes as a response body, for custom transports.
pub fn full_body(body: impl Into<Bytes>) -> RespBody {
    Full::new(body.into())
        .map_err(map_infallible_to_box_error)
        .boxed_unsync()
}
