use http::{HeaderMap, Method, StatusCode, Uri, Version};

/// Method, target and headers of the wire request that produced the response.
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

#[derive(Clone, Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

/// Outcome of a completed execution: the final attempt's request and response
/// heads. The response body has already been routed to the configured targets.
#[derive(Clone, Debug)]
pub struct Exchange {
    request: RequestHead,
    response: ResponseHead,
    attempts: usize,
}

impl Exchange {
    pub(crate) fn new(request: RequestHead, response: ResponseHead, attempts: usize) -> Self {
        Self {
            request,
            response,
            attempts,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    pub fn status_code(&self) -> u16 {
        self.response.status.as_u16()
    }

    pub fn request(&self) -> &RequestHead {
        &self.request
    }

    pub fn response(&self) -> &ResponseHead {
        &self.response
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.response.headers
    }

    /// Number of attempts made, including the final one.
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}
