// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use mab_core::ErrorKind;
use serde_json::json;

#[test]
fn request_params_default_to_null() {
    let request: Request = serde_json::from_str(r#"{"id":"1","method":"town.list"}"#).unwrap();
    assert_eq!(request.id, "1");
    assert_eq!(request.method, "town.list");
    assert!(request.params.is_null());
}

#[test]
fn success_response_omits_error_field() {
    let response = Response::ok("42", json!({"deleted": true}));
    let text = serde_json::to_string(&response).unwrap();
    assert!(text.contains("\"result\""));
    assert!(!text.contains("\"error\""));
}

#[test]
fn error_response_carries_stable_code() {
    let err = RpcError::new(ErrorKind::Capacity, "town full");
    let response = Response::fail("7", &err);
    let body = response.error.unwrap();
    assert_eq!(body.code, ErrorKind::Capacity.code());
    assert_eq!(body.message, "town full");
    assert!(response.result.is_none());
}

#[tokio::test]
async fn frames_round_trip() {
    let mut buf = Vec::new();
    write_frame(&mut buf, br#"{"id":"1"}"#).await.unwrap();

    let mut reader = std::io::Cursor::new(buf);
    let frame = read_frame(&mut reader).await.unwrap();
    assert_eq!(frame, br#"{"id":"1"}"#);
}

#[tokio::test]
async fn oversize_frame_is_refused_before_reading_payload() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(MAX_FRAME_SIZE as u32 + 1).to_be_bytes());
    // No payload behind the header: the reader must refuse on the prefix.
    let mut reader = std::io::Cursor::new(buf);
    let err = read_frame(&mut reader).await.unwrap_err();
    assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
}

#[tokio::test]
async fn oversize_write_is_refused() {
    let mut buf = Vec::new();
    let data = vec![0u8; MAX_FRAME_SIZE + 1];
    let err = write_frame(&mut buf, &data).await.unwrap_err();
    assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    assert!(buf.is_empty());
}

#[tokio::test]
async fn truncated_frame_reports_connection_closed() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&8u32.to_be_bytes());
    buf.extend_from_slice(b"shor");
    let mut reader = std::io::Cursor::new(buf);
    let err = read_frame(&mut reader).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}

#[tokio::test]
async fn empty_reader_reports_connection_closed() {
    let mut reader = std::io::Cursor::new(Vec::new());
    let err = read_frame(&mut reader).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}
