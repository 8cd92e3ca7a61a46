use std::collections::BTreeMap;

use http::header::{HeaderName, HeaderValue};
use http::{Method, Uri};

use crate::error::{BoxError, Error, TransportErrorKind, find_deadline};

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

/// Pairs up a flat `key, value, key, value, ..` list.
///
/// A trailing key without a value gets an empty value; pairs whose key is
/// empty are dropped.
pub(crate) fn key_value_pairs<I, S>(flat: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut items = flat.into_iter().map(Into::into);
    let mut pairs = Vec::new();
    while let Some(key) = items.next() {
        let value = items.next().unwrap_or_default();
        if key.is_empty() {
            continue;
        }
        pairs.push((key, value));
    }
    pairs
}

pub(crate) fn encode_pairs(pairs: &BTreeMap<String, String>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in pairs {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}

/// Parses `raw_url` and appends `query` after any query the url already carries.
pub(crate) fn resolve_url(raw_url: &str, query: &BTreeMap<String, String>) -> Result<Uri, Error> {
    let invalid = |reason: String| Error::InvalidUrl {
        url: raw_url.to_owned(),
        reason,
    };
    let mut url = url::Url::parse(raw_url).map_err(|source| invalid(source.to_string()))?;
    if !query.is_empty() {
        let encoded = encode_pairs(query);
        let merged = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
            _ => encoded,
        };
        url.set_query(Some(&merged));
    }
    url.as_str()
        .parse::<Uri>()
        .map_err(|source| invalid(source.to_string()))
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    if error.is_connect() {
        let text = error_chain_text(error);
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }

    let text = error_chain_text(error);
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

fn error_chain_text(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = error.to_string().to_ascii_lowercase();
    let mut current = error.source();
    while let Some(source) = current {
        text.push_str(": ");
        text.push_str(&source.to_string().to_ascii_lowercase());
        current = source.source();
    }
    text
}

/// Maps a failed transport call to a timeout when a connection deadline caused it.
pub(crate) fn transport_error(
    error: hyper_util::client::legacy::Error,
    method: &Method,
    uri: &str,
) -> Error {
    if let Some(deadline) = find_deadline(&error) {
        return Error::timeout(deadline.phase, deadline.timeout, method, uri);
    }
    Error::Transport {
        kind: classify_transport_error(&error),
        method: method.clone(),
        uri: uri.to_owned(),
        source: Box::new(error),
    }
}

/// Maps a failed response body read, surfacing deadline expiry as a timeout.
pub(crate) fn read_body_error(error: BoxError, method: &Method, uri: &str) -> Error {
    if let Some(deadline) = find_deadline(&*error) {
        return Error::timeout(deadline.phase, deadline.timeout, method, uri);
    }
    Error::ReadBody { source: error }
}
