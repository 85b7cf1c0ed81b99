//! Object-store seam.
//!
//! The store is only ever reached through presigned URLs, so the whole
//! surface is a single PUT.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use tracing::trace;

use crate::TransferError;

/// Boxed future returned by [`ObjectStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransferError>> + Send + 'a>>;

/// Longest error body kept in a [`TransferError::Store`] message.
pub const MAX_ERROR_BODY: usize = 512;

/// Direct write access to the object store.
///
/// Implemented over HTTP by [`HttpObjectStore`]; tests substitute mocks.
pub trait ObjectStore: Send + Sync {
    /// PUTs `body` to a presigned URL and returns the raw `ETag` header, if any.
    fn put<'a>(
        &'a self,
        url: &'a str,
        body: Bytes,
        content_type: Option<&'a str>,
    ) -> StoreFuture<'a, Option<String>>;
}

/// Cuts `text` to at most [`MAX_ERROR_BODY`] bytes on a char boundary.
pub fn truncate_error_body(mut text: String) -> String {
    if text.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

/// Removes the quote characters stores wrap around ETags.
pub fn strip_etag_quotes(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

/// [`ObjectStore`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
}

impl HttpObjectStore {
    /// Creates a store using the given HTTP client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ObjectStore for HttpObjectStore {
    fn put<'a>(
        &'a self,
        url: &'a str,
        body: Bytes,
        content_type: Option<&'a str>,
    ) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let len = body.len();
            let mut request = self
                .client
                .put(url)
                .header(CONTENT_LENGTH, len)
                .body(body);
            if let Some(ct) = content_type {
                request = request.header(CONTENT_TYPE, ct);
            }

            let response = request.send().await.map_err(TransferError::transport)?;
            let status = response.status();
            if !status.is_success() {
                let message = truncate_error_body(response.text().await.unwrap_or_default());
                return Err(TransferError::Store {
                    status: status.as_u16(),
                    message,
                });
            }

            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            trace!(bytes = len, etag = ?etag, "object store PUT accepted");
            Ok(etag)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Retryable;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answers a single request with `head` (status line plus extra headers)
    /// and `body`, handing back the raw request text.
    async fn serve_once(head: &'static str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = sock.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                    continue;
                };
                let lower = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let len = lower
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {head}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
            String::from_utf8_lossy(&buf).into_owned()
        });
        (format!("http://{addr}/bucket/key?sig=1"), handle)
    }

    fn store() -> HttpObjectStore {
        HttpObjectStore::new(reqwest::Client::builder().no_proxy().build().unwrap())
    }

    #[tokio::test]
    async fn put_returns_etag_and_sends_content_type() {
        let (url, server) = serve_once("200 OK\r\netag: \"abc123\"", String::new()).await;
        let etag = store()
            .put(&url, Bytes::from_static(b"hello"), Some("application/pdf"))
            .await
            .unwrap();
        assert_eq!(etag.as_deref(), Some("\"abc123\""));

        let raw = server.await.unwrap();
        assert!(raw.starts_with("PUT /bucket/key?sig=1 HTTP/1.1"));
        let lower = raw.to_ascii_lowercase();
        assert!(lower.contains("content-type: application/pdf"));
        assert!(lower.contains("content-length: 5"));
        assert!(raw.ends_with("hello"));
    }

    #[tokio::test]
    async fn part_put_has_no_content_type() {
        let (url, server) = serve_once("200 OK", String::new()).await;
        let etag = store()
            .put(&url, Bytes::from_static(b"part"), None)
            .await
            .unwrap();
        assert_eq!(etag, None);

        let raw = server.await.unwrap().to_ascii_lowercase();
        assert!(!raw.contains("content-type"));
    }

    #[tokio::test]
    async fn client_error_maps_to_store_status() {
        let (url, _server) = serve_once("403 Forbidden", "SignatureDoesNotMatch".into()).await;
        let err = store()
            .put(&url, Bytes::from_static(b"x"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            TransferError::Store { status: 403, message } if message == "SignatureDoesNotMatch"
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let (url, _server) = serve_once("503 Service Unavailable", "slow down".into()).await;
        let err = store()
            .put(&url, Bytes::from_static(b"x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Store { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn long_multibyte_error_body_is_cut_on_char_boundary() {
        let body = format!("{}€€€", "x".repeat(511));
        let (url, _server) = serve_once("403 Forbidden", body).await;
        let err = store()
            .put(&url, Bytes::from_static(b"x"), None)
            .await
            .unwrap_err();
        match err {
            TransferError::Store { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "x".repeat(511));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_url_is_validation() {
        let err = store()
            .put("not a url", Bytes::from_static(b"x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Validation(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn truncation_keeps_short_bodies() {
        assert_eq!(truncate_error_body("short".into()), "short");
        assert_eq!(truncate_error_body("é".repeat(400)).len(), MAX_ERROR_BODY);
    }

    #[test]
    fn strips_surrounding_quotes() {
        assert_eq!(strip_etag_quotes("\"9b2cf535f27731c974343645a3985328\""), "9b2cf535f27731c974343645a3985328");
        assert_eq!(strip_etag_quotes("abc"), "abc");
        assert_eq!(strip_etag_quotes("  \"abc\"  "), "abc");
        assert_eq!(strip_etag_quotes("\"\""), "");
    }
}
