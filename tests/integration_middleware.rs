use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use courier::prelude::*;
use courier::{Request, RetryOptions};
use http::header::{AUTHORIZATION, HeaderValue};
use http::Method;

#[derive(Clone)]
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl MockResponse {
    fn new(
        status: u16,
        headers: Vec<(impl Into<String>, impl Into<String>)>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            body: body.into(),
        }
    }
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    target: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

/// One-connection-per-response HTTP server; every response closes the
/// connection so each request is observed.
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
            let deadline = Instant::now() + Duration::from_secs(20);
            let mut response_index = 0;

            while response_index < responses.len() && Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        if let Ok(request) = read_request(&mut stream) {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }
                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let response = &responses[response_index];
                        response_index += 1;
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

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_owned();
    let target = parts.next().unwrap_or_default().to_owned();

    let mut headers = BTreeMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0_u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body)?;
    }

    Ok(CapturedRequest {
        method,
        target,
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let mut head = format!("HTTP/1.1 {} mock\r\n", response.status);
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!("content-length: {}\r\n", response.body.len()));
    head.push_str("connection: close\r\n\r\n");
    stream.write_all(head.as_bytes())?;
    stream.write_all(&response.body)?;
    stream.flush()
}

fn get_request(uri: &str) -> Request {
    Request::new(Method::GET, uri.parse().expect("request uri"))
}

fn client() -> Client {
    Client::new()
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_honors_retry_after_seconds() {
    let server = MockServer::start(vec![
        MockResponse::new(429, vec![("retry-after", "1")], ""),
        MockResponse::new(429, vec![("retry-after", "1")], ""),
        MockResponse::new(200, Vec::<(String, String)>::new(), "done"),
    ]);

    let mut request = get_request(&format!("{}/items", server.base_url));
    request.options.insert(Arc::new(RetryOptions {
        delay: Duration::from_millis(10),
        ..RetryOptions::default()
    }));

    let started = Instant::now();
    let response = client()
        .execute(request)
        .await
        .expect("request should succeed after retries");
    let elapsed = started.elapsed();

    assert_eq!(response.status(), 200);
    assert_eq!(server.served_count(), 3);
    assert!(elapsed >= Duration::from_secs(2), "elapsed: {elapsed:?}");
    let requests = server.requests();
    assert!(requests[0].headers.get("retry-attempt").is_none());
    assert_eq!(requests[1].headers.get("retry-attempt").map(String::as_str), Some("1"));
    assert_eq!(requests[2].headers.get("retry-attempt").map(String::as_str), Some("2"));
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_backs_off_exponentially_without_retry_after() {
    let server = MockServer::start(vec![
        MockResponse::new(429, Vec::<(String, String)>::new(), ""),
        MockResponse::new(429, Vec::<(String, String)>::new(), ""),
        MockResponse::new(429, Vec::<(String, String)>::new(), ""),
        MockResponse::new(429, Vec::<(String, String)>::new(), ""),
    ]);

    let mut request = get_request(&format!("{}/items", server.base_url));
    request.options.insert(Arc::new(RetryOptions {
        max_retries: 3,
        delay: Duration::from_secs(1),
        should_retry: None,
    }));

    let started = Instant::now();
    let response = client()
        .execute(request)
        .await
        .expect("exhausted retries still return the response");
    let elapsed = started.elapsed();

    assert_eq!(response.status(), 429);
    assert_eq!(server.served_count(), 4);
    // waits of 1, 2 and 4 seconds
    assert!(elapsed >= Duration::from_secs(7), "elapsed: {elapsed:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_aborts_on_deadline_with_a_cancellation_error() {
    let server = MockServer::start(vec![MockResponse::new(
        429,
        vec![("retry-after", "5")],
        "",
    )]);

    let mut request = get_request(&format!("{}/items", server.base_url));
    request.deadline = Some(tokio::time::Instant::now() + Duration::from_secs(1));

    let started = Instant::now();
    let error = client()
        .execute(request)
        .await
        .expect_err("deadline should interrupt the retry wait");

    assert!(error.is_cancellation(), "unexpected error: {error}");
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(server.served_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cross_port_redirect_scrubs_sensitive_headers() {
    let target_server = MockServer::start(vec![MockResponse::new(
        200,
        Vec::<(String, String)>::new(),
        "landed",
    )]);
    let origin_server = MockServer::start(vec![MockResponse::new(
        301,
        vec![("location", format!("{}/y", target_server.base_url))],
        "",
    )]);

    let mut request = get_request(&format!("{}/x", origin_server.base_url));
    request
        .headers
        .insert(AUTHORIZATION, HeaderValue::from_static("Bearer T"));
    request
        .headers
        .insert(http::header::COOKIE, HeaderValue::from_static("s=1"));

    let response = client()
        .execute(request)
        .await
        .expect("redirect should be followed");

    assert_eq!(response.status(), 200);
    let landed = target_server.requests();
    assert_eq!(landed.len(), 1);
    assert_eq!(landed[0].target, "/y");
    assert!(!landed[0].headers.contains_key("authorization"));
    assert!(!landed[0].headers.contains_key("cookie"));
}

#[tokio::test(flavor = "multi_thread")]
async fn same_host_relative_redirect_keeps_authorization() {
    let server = MockServer::start(vec![
        MockResponse::new(307, vec![("location", "/v2")], ""),
        MockResponse::new(200, Vec::<(String, String)>::new(), "landed"),
    ]);

    let mut request = get_request(&format!("{}/v1", server.base_url));
    request
        .headers
        .insert(AUTHORIZATION, HeaderValue::from_static("Bearer T"));

    let response = client()
        .execute(request)
        .await
        .expect("redirect should be followed");

    assert_eq!(response.status(), 200);
    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].target, "/v2");
    assert_eq!(
        requests[1].headers.get("authorization").map(String::as_str),
        Some("Bearer T")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn compression_falls_back_to_uncompressed_on_415() {
    let server = MockServer::start(vec![
        MockResponse::new(415, Vec::<(String, String)>::new(), ""),
        MockResponse::new(200, Vec::<(String, String)>::new(), "stored"),
    ]);

    let body = Bytes::from(b"0123456789abcdef".repeat(64));
    let mut request = Request::new(
        Method::PUT,
        format!("{}/items/1", server.base_url).parse().expect("uri"),
    );
    request.body = body.clone();

    let response = client()
        .execute(request)
        .await
        .expect("fallback request should succeed");

    assert_eq!(response.status(), 200);
    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].headers.get("content-encoding").map(String::as_str),
        Some("gzip")
    );
    // gzip magic bytes on the wire
    assert_eq!(&requests[0].body[..2], &[0x1f, 0x8b]);
    assert!(!requests[1].headers.contains_key("content-encoding"));
    assert_eq!(requests[1].body, body.as_ref());
}

#[tokio::test(flavor = "multi_thread")]
async fn default_chain_decodes_parameter_names_and_brands_the_user_agent() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        Vec::<(String, String)>::new(),
        "",
    )]);

    let request = get_request(&format!(
        "{}/users?%24select=displayName&api%2Dversion=2",
        server.base_url
    ));
    client().execute(request).await.expect("request should succeed");

    let requests = server.requests();
    assert_eq!(requests[0].target, "/users?$select=displayName&api-version=2");
    let user_agent = requests[0]
        .headers
        .get("user-agent")
        .cloned()
        .unwrap_or_default();
    assert!(user_agent.contains("courier-rs/"), "user-agent: {user_agent}");
}

#[tokio::test(flavor = "multi_thread")]
async fn values_outside_the_decode_set_are_delivered_unchanged() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        Vec::<(String, String)>::new(),
        "",
    )]);

    let request = get_request(&format!("{}/search?q=1%2B2", server.base_url));
    client().execute(request).await.expect("request should succeed");

    assert_eq!(server.requests()[0].target, "/search?q=1%2B2");
}
