// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::ControlError;
use tokio::io::BufReader;

async fn parse(raw: &str) -> Result<String, ControlError> {
    let mut reader = BufReader::new(raw.as_bytes());
    read_http_response(&mut reader).await
}

#[tokio::test]
async fn parses_body_by_content_length() {
    let raw = "HTTP/1.1 200 OK\r\nContent-Length: 13\r\n\r\n{\"ok\": true}\n";
    let body = parse(raw).await.unwrap();
    assert_eq!(body, "{\"ok\": true}\n");
}

#[tokio::test]
async fn empty_body_without_content_length() {
    let raw = "HTTP/1.1 204 No Content\r\n\r\n";
    let body = parse(raw).await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn content_length_header_is_case_insensitive() {
    let raw = "HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok";
    let body = parse(raw).await.unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn error_status_becomes_http_error() {
    let raw = "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\n\r\nboom";
    let err = parse(raw).await.unwrap_err();
    let ControlError::Http(msg) = err else {
        panic!("expected http error, got {err:?}");
    };
    assert!(msg.contains("500"));
    assert!(msg.contains("boom"));
}

#[tokio::test]
async fn not_found_is_an_error() {
    let raw = "HTTP/1.1 404 Not Found\r\n\r\n";
    assert!(parse(raw).await.is_err());
}

#[tokio::test]
async fn connect_to_unbound_port_fails() {
    // Port 1 is essentially never listening.
    let err = get("127.0.0.1:1", "/health").await.unwrap_err();
    assert!(matches!(err, ControlError::Http(_) | ControlError::Timeout));
}
