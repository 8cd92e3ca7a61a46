use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use reqkit::prelude::*;
use serde_json::{Value, json};

#[derive(Clone)]
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    delay: Duration,
}

impl MockResponse {
    fn new(
        status: u16,
        headers: Vec<(impl Into<String>, impl Into<String>)>,
        body: impl Into<String>,
        delay: Duration,
    ) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            body: body.into().into_bytes(),
            delay,
        }
    }

    fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, Vec::<(String, String)>::new(), body, Duration::ZERO)
    }
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

struct MockServer {
    base_url: String,
    served: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let served_clone = Arc::clone(&served);
        let captured_clone = Arc::clone(&captured);

        let join = thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            let mut response_index = 0;

            while response_index < responses.len() && std::time::Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        if let Ok(request) = read_request(&mut stream) {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }

                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let response = &responses[response_index];
                        response_index += 1;

                        if !response.delay.is_zero() {
                            thread::sleep(response.delay);
                        }

                        let _ = write_response(&mut stream, response);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            served,
            captured,
            join: Some(join),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }

    fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Sends the response head immediately and the body after `body_delay`.
struct SplitBodyServer {
    base_url: String,
    join: Option<JoinHandle<()>>,
}

impl SplitBodyServer {
    fn start(status: u16, body: Vec<u8>, body_delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind split body server");
        let address = listener
            .local_addr()
            .expect("read split body server address");
        listener
            .set_nonblocking(true)
            .expect("set split body listener nonblocking");

        let join = thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            while std::time::Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        let _ = read_request(&mut stream);

                        let head = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            status,
                            status_text(status),
                            body.len()
                        );
                        let _ = stream.write_all(head.as_bytes());
                        let _ = stream.flush();
                        if !body_delay.is_zero() {
                            thread::sleep(body_delay);
                        }
                        let _ = stream.write_all(&body);
                        let _ = stream.flush();
                        break;
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            join: Some(join),
        }
    }
}

impl Drop for SplitBodyServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if find_header_end(&raw).is_some() {
            break;
        }
    }

    let header_end = find_header_end(&raw).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed request without header terminator",
        )
    })?;

    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing request line")
    })?;
    let mut request_line_parts = request_line.split_whitespace();
    let method = request_line_parts.next().unwrap_or_default().to_owned();
    let path = request_line_parts.next().unwrap_or_default().to_owned();

    let mut headers = BTreeMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    if headers
        .get("transfer-encoding")
        .is_some_and(|value| value.eq_ignore_ascii_case("chunked"))
    {
        let mut body = raw[header_end + 4..].to_vec();
        while !body.ends_with(b"0\r\n\r\n") {
            let mut chunk = [0_u8; 1024];
            let read = stream.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }
        return Ok(CapturedRequest {
            method,
            path,
            headers,
            body: decode_chunked(&body),
        });
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn decode_chunked(mut raw: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    while let Some(line_end) = raw.windows(2).position(|window| window == b"\r\n") {
        let size_text = String::from_utf8_lossy(&raw[..line_end]);
        let size = usize::from_str_radix(size_text.trim(), 16).unwrap_or(0);
        if size == 0 {
            break;
        }
        let start = line_end + 2;
        let end = (start + size).min(raw.len());
        body.extend_from_slice(&raw[start..end]);
        raw = raw.get(end + 2..).unwrap_or_default();
    }
    body
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let body = &response.body;
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        body.len()
    );
    for (name, value) in &response.headers {
        raw.push_str(name);
        raw.push_str(": ");
        raw.push_str(value);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

fn client_with_timeouts(timeouts: Timeouts) -> Client {
    Client::new(Config::default().with_timeouts(timeouts)).expect("client should build")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_sends_query_and_headers_and_decodes_json() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "application/json")],
        r#"{"items":[1,2]}"#,
        Duration::ZERO,
    )]);
    let client = Client::new(Config::default()).expect("client should build");
    let mut decoded = Value::Null;

    let exchange = client
        .get(
            &server.url("/v1/items?lang=en"),
            vec![
                with_query(["q", "a b", "page", "2"]),
                with_header(["x-request-id", "req-1"]),
                with_response_json(&mut decoded),
            ],
        )
        .await
        .expect("request should succeed");

    assert_eq!(exchange.status_code(), 200);
    assert_eq!(decoded, json!({ "items": [1, 2] }));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/v1/items?lang=en&page=2&q=a+b");
    assert_eq!(
        requests[0].headers.get("x-request-id").map(String::as_str),
        Some("req-1")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn post_json_sends_body_and_content_type() {
    let server = MockServer::start(vec![MockResponse::text(201, "created")]);
    let mut copied = Vec::new();

    reqkit::post(
        &server.url("/v1/items"),
        vec![
            with_json(&json!({ "name": "demo" })),
            with_basic_auth("user", "pass"),
            with_response_copy(&mut copied),
        ],
    )
    .await
    .expect("request should succeed");

    assert_eq!(copied, b"created".to_vec());
    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, br#"{"name":"demo"}"#.to_vec());
    assert_eq!(
        requests[0].headers.get("content-type").map(String::as_str),
        Some("application/json; charset=utf-8")
    );
    assert_eq!(
        requests[0].headers.get("authorization").map(String::as_str),
        Some("Basic dXNlcjpwYXNz")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn form_post_sends_encoded_fields() {
    let server = MockServer::start(vec![MockResponse::text(200, "")]);

    reqkit::execute(
        http::Method::POST,
        &server.url("/login"),
        vec![with_form(["user", "ann", "note", "a&b"])],
    )
    .await
    .expect("request should succeed");

    let requests = server.requests();
    assert_eq!(requests[0].body, b"note=a%26b&user=ann".to_vec());
    assert_eq!(
        requests[0].headers.get("content-type").map(String::as_str),
        Some("application/x-www-form-urlencoded")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn error_status_returns_body_as_message_without_retry() {
    let server = MockServer::start(vec![
        MockResponse::text(500, "database unavailable"),
        MockResponse::text(200, "unused"),
    ]);
    let client = Client::new(Config::default()).expect("client should build");

    let error = client
        .get(&server.url("/health"), vec![with_retry_times(1)])
        .await
        .expect_err("500 should be an error");

    assert_eq!(error.to_string(), "database unavailable");
    assert_eq!(error.status(), Some(500));
    assert_eq!(server.served_count(), 1);

    // Releases the second scripted response so the server thread exits.
    let _ = client.get(&server.url("/health"), Vec::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_content_response_succeeds_without_touching_targets() {
    let server = MockServer::start(vec![MockResponse::text(204, "")]);
    let mut decoded = json!("untouched");

    let exchange = reqkit::delete(
        &server.url("/v1/items/7"),
        vec![with_response_json(&mut decoded)],
    )
    .await
    .expect("204 should succeed");

    assert_eq!(exchange.status_code(), 204);
    assert_eq!(decoded, json!("untouched"));
    assert_eq!(server.requests()[0].method, "DELETE");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connection_refused_is_retried_then_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind placeholder listener");
    let address = listener.local_addr().expect("read placeholder address");
    drop(listener);

    let client = Client::new(Config::default()).expect("client should build");
    let error = client
        .get(&format!("http://{address}/"), vec![with_retry_times(2)])
        .await
        .expect_err("nothing listens on the released address");

    match error {
        Error::Transport { kind, .. } => assert_eq!(kind, TransportErrorKind::Connect),
        other => panic!("unexpected error variant: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_headers_report_response_header_phase() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        Vec::<(String, String)>::new(),
        "late",
        Duration::from_millis(400),
    )]);
    let client = client_with_timeouts(
        Timeouts::default()
            .with_read(Duration::from_secs(2))
            .with_header(Duration::from_millis(100)),
    );

    let error = client
        .get(&server.url("/slow"), Vec::new())
        .await
        .expect_err("headers arrive too late");

    match error {
        Error::Timeout { phase, .. } => assert_eq!(phase, TimeoutPhase::ResponseHeader),
        other => panic!("unexpected error variant: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn header_window_starts_after_slow_upload_finishes() {
    let server = MockServer::start(vec![MockResponse::text(201, "stored")]);
    let client = client_with_timeouts(
        Timeouts::default()
            .with_read(Duration::from_secs(2))
            .with_write(Duration::from_secs(2))
            .with_header(Duration::from_millis(300)),
    );

    let started = std::time::Instant::now();
    let exchange = client
        .post(
            &server.url("/upload"),
            vec![with_body_factory(|| {
                let (reader, mut writer) = tokio::io::duplex(64);
                tokio::spawn(async move {
                    use tokio::io::AsyncWriteExt;
                    for index in 0..4 {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        let _ = writer.write_all(format!("part-{index};").as_bytes()).await;
                    }
                });
                Ok(reader)
            })],
        )
        .await
        .expect("a slow upload must not eat into the header window");

    assert_eq!(exchange.status_code(), 201);
    assert!(started.elapsed() >= Duration::from_millis(800));
    assert_eq!(server.served_count(), 1);
    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, b"part-0;part-1;part-2;part-3;");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_deadline_applies_while_waiting_for_headers() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        Vec::<(String, String)>::new(),
        "late",
        Duration::from_millis(400),
    )]);
    let client = client_with_timeouts(
        Timeouts::default()
            .with_read(Duration::from_millis(100))
            .with_header(Duration::ZERO),
    );

    let error = client
        .get(&server.url("/slow"), Vec::new())
        .await
        .expect_err("read deadline should fire");

    match error {
        Error::Timeout {
            phase, timeout_ms, ..
        } => {
            assert_eq!(phase, TimeoutPhase::Read);
            assert_eq!(timeout_ms, 100);
        }
        other => panic!("unexpected error variant: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_body_reports_read_phase() {
    let server = SplitBodyServer::start(200, b"slow body".to_vec(), Duration::from_millis(400));
    let client = client_with_timeouts(Timeouts::default().with_read(Duration::from_millis(100)));
    let mut copied = Vec::new();

    let error = client
        .get(
            &format!("{}/body", server.base_url),
            vec![with_response_copy(&mut copied)],
        )
        .await
        .expect_err("body arrives too late");

    assert!(error.is_timeout());
    match error {
        Error::Timeout { phase, .. } => assert_eq!(phase, TimeoutPhase::Read),
        other => panic!("unexpected error variant: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn per_request_config_replaces_client_timeouts() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        Vec::<(String, String)>::new(),
        "late",
        Duration::from_millis(400),
    )]);
    let client = Client::new(Config::default()).expect("client should build");
    let strict = Config::default().with_timeouts(
        Timeouts::default()
            .with_read(Duration::from_secs(2))
            .with_header(Duration::from_millis(100)),
    );

    let error = client
        .get(&server.url("/slow"), vec![with_config(strict)])
        .await
        .expect_err("per-request header timeout should fire");

    assert_eq!(error.code(), ErrorCode::Timeout);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn plain_http_through_proxy_uses_absolute_form_and_credentials() {
    let proxy = MockServer::start(vec![MockResponse::text(200, "via proxy")]);
    let config = Config::default()
        .with_proxy(ProxyConfig::new(proxy.base_url.clone()).with_credentials("user", "pass"));
    let client = Client::new(config).expect("client should build");
    let mut copied = Vec::new();

    client
        .get(
            "http://origin.example.test/v1/items?x=1",
            vec![with_response_copy(&mut copied)],
        )
        .await
        .expect("proxy should answer");

    assert_eq!(copied, b"via proxy".to_vec());
    let requests = proxy.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "http://origin.example.test/v1/items?x=1");
    assert_eq!(
        requests[0].headers.get("proxy-authorization").map(String::as_str),
        Some("Basic dXNlcjpwYXNz")
    );
}

#[test]
fn invalid_proxy_url_fails_client_construction() {
    let error = Client::new(Config::default().with_proxy(ProxyConfig::new("not a proxy")))
        .expect_err("proxy url should be rejected");
    assert_eq!(error.code(), ErrorCode::InvalidProxy);
}
