use vibeserv::http::{HttpResponse, HttpRequest, Method, ParseError, ParsingState};

#[test]
fn simple_get_request_parses_completely() {
    let mut req = HttpRequest::new();
    req.buffer.extend_from_slice(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n");

    req.advance().unwrap();

    assert_eq!(req.method, Method::Get);
    assert_eq!(req.path, "/index.html");
    assert_eq!(req.state, ParsingState::HeadersDone);
    assert_eq!(req.headers.get("host").unwrap(), "localhost");
}

#[test]
fn fragmented_request_line_reports_incomplete_until_whole() {
    let mut req = HttpRequest::new();

    req.buffer.extend_from_slice(b"GET /path ");
    assert_eq!(req.advance().unwrap_err(), ParseError::IncompleteRequestLine);

    req.buffer.extend_from_slice(b"HTTP/1.1\r\n");
    assert_eq!(req.advance().unwrap_err(), ParseError::IncompleteRequestLine);
    assert_eq!(req.state, ParsingState::Headers);

    req.buffer.extend_from_slice(b"Host: h\r\nUser-Agent: test\r\n\r\n");
    req.advance().unwrap();
    assert_eq!(req.state, ParsingState::HeadersDone);
}

#[test]
fn post_request_with_fixed_content_length_reports_headers_done() {
    let mut req = HttpRequest::new();
    req.buffer.extend_from_slice(
        b"POST /api HTTP/1.1\r\nHost: h\r\nContent-Length: 13\r\n\r\nHello, World!",
    );

    req.advance().unwrap();

    assert_eq!(req.method, Method::Post);
    assert_eq!(req.content_length, 13);
    assert_eq!(req.state, ParsingState::HeadersDone);
    // the body bytes remain unconsumed in the buffer for the dispatcher to drain.
    assert_eq!(&req.buffer[..], b"Hello, World!");
}

#[test]
fn invalid_method_is_rejected() {
    let mut req = HttpRequest::new();
    req.buffer.extend_from_slice(b"PATCH /invalid HTTP/1.1\r\nHost: h\r\n\r\n");
    assert_eq!(req.advance().unwrap_err(), ParseError::InvalidMethod);
}

#[test]
fn missing_host_header_is_rejected() {
    let mut req = HttpRequest::new();
    req.buffer.extend_from_slice(b"GET / HTTP/1.1\r\n\r\n");
    assert_eq!(req.advance().unwrap_err(), ParseError::MissingHost);
}

#[test]
fn chunked_request_transitions_to_chunked_body_state() {
    let mut req = HttpRequest::new();
    req.buffer.extend_from_slice(
        b"POST /upload HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nHello\r\n0\r\n\r\n",
    );
    req.advance().unwrap();
    assert_eq!(req.state, ParsingState::ChunkedBody);
    assert!(req.parse_chunked_body().unwrap());
}

#[test]
fn response_serializes_status_line_and_body() {
    let mut res = HttpResponse::new(200);
    res.set_header("content-type", "text/plain".to_string());
    res.set_body(b"Hello Rust".to_vec(), "text/plain");

    let bytes = res.to_bytes();
    let s = String::from_utf8_lossy(&bytes);

    assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(s.contains("Content-Type: text/plain\r\n"));
    assert!(s.contains("Content-Length: 10\r\n"));
    assert!(s.ends_with("\r\n\r\nHello Rust"));
}
