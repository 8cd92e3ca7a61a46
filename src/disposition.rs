//! Routing of a final response to the caller's targets.

use http::{Method, Response, StatusCode};
use http_body_util::BodyExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::body::{RespBody, read_all_body};
use crate::error::Error;
use crate::request::{CopyTarget, JsonTarget};
use crate::response::ResponseHead;
use crate::util::read_body_error;

pub(crate) struct Targets<'t, 'c> {
    pub(crate) error_on_status: bool,
    pub(crate) json: Option<&'t mut dyn JsonTarget>,
    pub(crate) copy: Option<&'t mut CopyTarget<'c>>,
}

/// Consumes `response` according to the status and the configured targets.
///
/// The body is dropped on every return path, so the connection is released
/// whether or not it was read.
pub(crate) async fn dispose(
    response: Response<RespBody>,
    targets: Targets<'_, '_>,
    method: &Method,
    uri: &str,
) -> Result<ResponseHead, Error> {
    let (parts, body) = response.into_parts();
    let head = ResponseHead {
        status: parts.status,
        version: parts.version,
        headers: parts.headers,
    };
    let status = head.status;

    if targets.error_on_status && status.as_u16() >= 300 {
        let bytes = read_all_body(body)
            .await
            .map_err(|error| read_body_error(error, method, uri))?;
        return Err(Error::HttpStatus {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }

    if status == StatusCode::NO_CONTENT {
        debug!(status = status.as_u16(), "response has no content");
        return Ok(head);
    }

    match (targets.json, targets.copy) {
        (None, None) => {
            drop(body);
        }
        (None, Some(sink)) => {
            copy_body(body, sink, method, uri).await?;
        }
        (Some(target), None) => {
            // Buffered on purpose: serde_json decodes from a complete slice.
            let bytes = read_all_body(body)
                .await
                .map_err(|error| read_body_error(error, method, uri))?;
            target
                .decode_json(&bytes)
                .map_err(|source| Error::Deserialize { source })?;
        }
        (Some(target), Some(sink)) => {
            let bytes = read_all_body(body)
                .await
                .map_err(|error| read_body_error(error, method, uri))?;
            target
                .decode_json(&bytes)
                .map_err(|source| Error::Deserialize { source })?;
            sink.write_all(&bytes)
                .await
                .map_err(|source| Error::WriteBody { source })?;
            sink.flush()
                .await
                .map_err(|source| Error::WriteBody { source })?;
        }
    }

    debug!(status = status.as_u16(), "response disposed");
    Ok(head)
}

async fn copy_body(
    mut body: RespBody,
    sink: &mut CopyTarget<'_>,
    method: &Method,
    uri: &str,
) -> Result<(), Error> {
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|error| read_body_error(error, method, uri))?;
        if let Ok(chunk) = frame.into_data() {
            sink.write_all(&chunk)
                .await
                .map_err(|source| Error::WriteBody { source })?;
        }
    }
    sink.flush()
        .await
        .map_err(|source| Error::WriteBody { source })
}
