//! Minimal JSON-over-HTTP/1.1 client.
//!
//! Every call opens a fresh connection, sends one request, and reads the
//! whole response body.

use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ClusterError, ClusterResult};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Status and body of a completed request.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> ClusterResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Join a base URI and path segments with exactly one `/` between them.
pub fn join_uri(base: &str, segments: &[&str]) -> String {
    let mut uri = base.trim_end_matches('/').to_string();
    for segment in segments {
        let segment = segment.trim_matches('/');
        if !segment.is_empty() {
            uri.push('/');
            uri.push_str(segment);
        }
    }
    uri
}

/// POST `body` as JSON to `uri`.
pub async fn post_json<T: Serialize + ?Sized>(
    uri: &str,
    body: &T,
    timeout: Duration,
) -> ClusterResult<HttpResponse> {
    let parsed: Uri = uri
        .parse()
        .map_err(|e| ClusterError::InvalidUri(format!("{uri}: {e}")))?;
    if parsed.scheme_str() != Some("http") {
        return Err(ClusterError::InvalidUri(format!(
            "{uri}: only http:// endpoints are supported"
        )));
    }
    let authority = parsed
        .authority()
        .cloned()
        .ok_or_else(|| ClusterError::InvalidUri(format!("{uri}: missing host")))?;
    let path = parsed
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let payload = Bytes::from(serde_json::to_vec(body)?);

    let exchange = async {
        let host = authority.host().trim_start_matches('[').trim_end_matches(']');
        let port = authority.port_u16().unwrap_or(80);
        let stream = tokio::net::TcpStream::connect((host, port)).await?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

        // Drive the connection in the background.
        let conn_uri = uri.to_string();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, uri = %conn_uri, "connection closed with error");
            }
        });

        let req = http::Request::builder()
            .method(Method::POST)
            .uri(path.as_str())
            .header(HOST, authority.as_str())
            .header(USER_AGENT, "polaris/0.1")
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(Full::new(payload))?;

        let resp = sender.send_request(req).await?;
        let status = resp.status();
        let body = resp.into_body().collect().await?.to_bytes();
        Ok::<_, ClusterError>(HttpResponse { status, body })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%uri, "request timed out");
            Err(ClusterError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::routing::post;

    #[test]
    fn join_uri_normalizes_slashes() {
        assert_eq!(join_uri("http://a:1/", &["/samples/", "random"]), "http://a:1/samples/random");
        assert_eq!(join_uri("http://a:1", &["agent", "scheduling-decision"]), "http://a:1/agent/scheduling-decision");
        assert_eq!(join_uri("http://a:1/x", &[""]), "http://a:1/x");
    }

    #[tokio::test]
    async fn rejects_unsupported_schemes() {
        let err = post_json("https://example.com/x", &1, DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::InvalidUri(_)));
    }

    #[tokio::test]
    async fn posts_json_and_reads_response() {
        let app = Router::new().route(
            "/echo",
            post(|Json(v): Json<serde_json::Value>| async move {
                (axum::http::StatusCode::CREATED, Json(serde_json::json!({ "got": v })))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let resp = post_json(
            &format!("http://{addr}/echo"),
            &serde_json::json!({"a": 1}),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await
        .unwrap();

        assert_eq!(resp.status, StatusCode::CREATED);
        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body["got"]["a"], 1);
    }

    #[tokio::test]
    async fn connection_refused_is_an_io_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = post_json(&format!("http://{addr}/x"), &1, DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Io(_)));
    }
}
