//! Streaming multipart re-encoding for uploads.
//!
//! The inbound form is decoded part by part and re-emitted as a fresh
//! `multipart/form-data` body without ever holding more than a chunk of one
//! part in memory:
//!
//! ```text
//! client ──multipart──▶ axum Multipart ──fields/chunks──▶ mpsc(4) ──▶ Body::from_stream ──▶ worker
//! ```
//!
//! File name and content type of every part are preserved. If the inbound
//! form cannot be decoded the outbound body ends with an error, which aborts
//! the worker request instead of delivering a truncated upload, and the
//! reason is reported through the returned [`DecodeFailure`] receiver.

use std::io;

use axum::{
    body::{Body, Bytes},
    extract::{multipart::MultipartError, Multipart},
    http::StatusCode,
};
use futures_util::stream;
use tokio::sync::{mpsc, oneshot};

/// Chunks buffered between the decoder task and the outbound body.
const CHANNEL_DEPTH: usize = 4;

/// Random boundary that cannot collide with a caller-chosen one.
pub fn new_boundary() -> String {
    format!("----doc-gateway-{}", uuid::Uuid::new_v4().simple())
}

/// `Content-Type` value for a body framed with `boundary`.
pub fn content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={}", boundary)
}

/// Quote a header parameter per the HTML form-data encoding rules.
fn escape_param(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Delimiter and headers that open a part.
pub fn part_header(
    boundary: &str,
    first: bool,
    name: &str,
    file_name: Option<&str>,
    content_type: Option<&str>,
) -> Bytes {
    let mut head = String::new();
    if !first {
        head.push_str("\r\n");
    }
    head.push_str("--");
    head.push_str(boundary);
    head.push_str("\r\nContent-Disposition: form-data; name=\"");
    head.push_str(&escape_param(name));
    head.push('"');
    if let Some(file_name) = file_name {
        head.push_str("; filename=\"");
        head.push_str(&escape_param(file_name));
        head.push('"');
    }
    head.push_str("\r\n");
    if let Some(content_type) = content_type {
        head.push_str("Content-Type: ");
        head.push_str(&content_type.replace(['\r', '\n'], ""));
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    Bytes::from(head)
}

/// Closing delimiter. `empty` is true when no part was written.
pub fn closing(boundary: &str, empty: bool) -> Bytes {
    let lead = if empty { "" } else { "\r\n" };
    Bytes::from(format!("{}--{}--\r\n", lead, boundary))
}

/// The client's form could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    /// `413` when the form outgrew the body limit, `400` otherwise.
    pub status: StatusCode,
    pub message: String,
}

/// Re-stream `multipart` as a body framed with `boundary`.
///
/// Must be called inside a Tokio runtime: decoding runs on a spawned task
/// that stops as soon as the outbound body is dropped. The receiver resolves
/// only if decoding fails, and is signalled before the body ends with an error.
pub fn restream(multipart: Multipart, boundary: String) -> (Body, oneshot::Receiver<DecodeFailure>) {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);
    let (failed_tx, failed_rx) = oneshot::channel();

    tokio::spawn(async move {
        if let Err(e) = pump(multipart, &boundary, &tx).await {
            tracing::warn!(error = %e, "Upload stream aborted");
            let _ = failed_tx.send(DecodeFailure {
                status: e.status(),
                message: e.body_text(),
            });
            let _ = tx.send(Err(io::Error::other(e))).await;
        }
    });

    let chunks = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (Body::from_stream(chunks), failed_rx)
}

async fn pump(
    mut multipart: Multipart,
    boundary: &str,
    tx: &mpsc::Sender<io::Result<Bytes>>,
) -> Result<(), MultipartError> {
    let mut parts = 0usize;

    while let Some(mut field) = multipart.next_field().await? {
        let head = part_header(
            boundary,
            parts == 0,
            field.name().unwrap_or_default(),
            field.file_name(),
            field.content_type(),
        );
        if tx.send(Ok(head)).await.is_err() {
            // Outbound request dropped (timeout or client gone).
            return Ok(());
        }

        while let Some(chunk) = field.chunk().await? {
            if tx.send(Ok(chunk)).await.is_err() {
                return Ok(());
            }
        }
        parts += 1;
    }

    tracing::debug!(parts, "Upload re-streamed");
    let _ = tx.send(Ok(closing(boundary, parts == 0))).await;
    Ok(())
}
