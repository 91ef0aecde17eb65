//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use http::request::Parts;
use http::{Extensions, HeaderMap, Method, Uri};
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody as CombinedBody;
use tokio::time::Instant;

use crate::error::BoxError;

pub(crate) type BoxBody = CombinedBody<Bytes, BoxError>;

/// Peer address of the connection a request arrived on.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RemoteAddr(pub(crate) SocketAddr);

/// Point in time after which reading the request body fails.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BodyDeadline(pub(crate) Instant);

/// Why the request body could not be read.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("reading request body: {0}")]
    Read(#[source] BoxError),

    #[error("request body too large (limit {0} bytes)")]
    TooLarge(usize),

    #[error("timed out reading request body")]
    Timeout,
}

enum Body {
    Streaming(BoxBody),
    Buffered(Bytes),
}

/// A matched request, as seen by middleware and controllers.
///
/// The body is read lazily with [`bytes`](Request::bytes) and cached, so a
/// middleware that peeks at it does not starve the controller.
pub struct Request {
    parts: Parts,
    body: Body,
    params: HashMap<String, String>,
}

impl Request {
    pub(crate) fn new(parts: Parts, body: BoxBody, params: HashMap<String, String>) -> Self {
        Self { parts, body: Body::Streaming(body), params }
    }

    pub fn method(&self) -> &Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn query(&self) -> Option<&str> { self.parts.uri.query() }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn extensions(&self) -> &Extensions { &self.parts.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.parts.extensions }

    /// Header lookup. Values that are not visible ASCII are skipped.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named route placeholder.
    ///
    /// For a route `/items/{id}`, `req.param("id")` on `/items/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Address of the connected peer. `None` when dispatched outside a server.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.parts.extensions.get::<RemoteAddr>().map(|a| a.0)
    }

    /// Reads the whole body. The first call consumes the stream; later calls
    /// return the cached bytes.
    pub async fn bytes(&mut self) -> Result<Bytes, BodyError> {
        self.read_body(None).await
    }

    /// Like [`bytes`](Self::bytes), failing once more than `limit` bytes arrive.
    pub async fn bytes_limited(&mut self, limit: usize) -> Result<Bytes, BodyError> {
        self.read_body(Some(limit)).await
    }

    async fn read_body(&mut self, limit: Option<usize>) -> Result<Bytes, BodyError> {
        let body = match std::mem::replace(&mut self.body, Body::Buffered(Bytes::new())) {
            Body::Buffered(bytes) => {
                self.body = Body::Buffered(bytes.clone());
                return match limit {
                    Some(limit) if bytes.len() > limit => Err(BodyError::TooLarge(limit)),
                    _ => Ok(bytes),
                };
            }
            Body::Streaming(body) => body,
        };

        let bytes = match self.parts.extensions.get::<BodyDeadline>().copied() {
            Some(deadline) => tokio::time::timeout_at(deadline.0, collect(body, limit))
                .await
                .map_err(|_| BodyError::Timeout)??,
            None => collect(body, limit).await?,
        };
        self.body = Body::Buffered(bytes.clone());
        Ok(bytes)
    }
}

/// Drains `body` frame by frame, failing as soon as more than `limit` data
/// bytes have arrived. Trailers are dropped.
async fn collect(mut body: BoxBody, limit: Option<usize>) -> Result<Bytes, BodyError> {
    let mut buf = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let Ok(data) = frame.map_err(BodyError::Read)?.into_data() else {
            continue;
        };
        if let Some(limit) = limit {
            if buf.len() + data.len() > limit {
                return Err(BodyError::TooLarge(limit));
            }
        }
        buf.extend_from_slice(&data);
    }
    Ok(buf.freeze())
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use http_body_util::Full;

    pub(crate) fn request(method: Method, uri: &str, body: impl Into<Bytes>) -> Request {
        let (parts, body) = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(body.into()))
            .unwrap()
            .into_parts();
        Request::new(parts, body.map_err(Into::into).boxed(), HashMap::new())
    }

    #[tokio::test]
    async fn body_is_cached_after_first_read() {
        let mut req = request(Method::POST, "/echo", "payload");
        assert_eq!(req.bytes().await.unwrap(), "payload");
        assert_eq!(req.bytes().await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn limit_applies_to_streaming_and_cached_bodies() {
        let mut req = request(Method::POST, "/echo", "0123456789");
        assert!(matches!(req.bytes_limited(4).await, Err(BodyError::TooLarge(4))));

        let mut req = request(Method::POST, "/echo", "0123456789");
        req.bytes().await.unwrap();
        assert!(matches!(req.bytes_limited(4).await, Err(BodyError::TooLarge(4))));
        assert_eq!(req.bytes_limited(64).await.unwrap().len(), 10);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn body_futures_are_send() {
        let mut req = request(Method::POST, "/echo", "payload");
        assert_send(&req.bytes());
        assert_send(&req.bytes_limited(4));
    }

    #[tokio::test]
    async fn expired_deadline_times_out() {
        let mut req = request(Method::POST, "/echo", "payload");
        req.extensions_mut()
            .insert(BodyDeadline(Instant::now() - std::time::Duration::from_millis(1)));
        assert!(matches!(req.bytes().await, Err(BodyError::Timeout)));
    }

    #[tokio::test]
    async fn limit_equal_to_body_length_passes() {
        let mut req = request(Method::POST, "/echo", "0123");
        assert_eq!(req.bytes_limited(4).await.unwrap(), "0123");
    }

    #[tokio::test]
    async fn accessors_expose_uri_parts() {
        let req = request(Method::GET, "/items/42?verbose=1", "");
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.path(), "/items/42");
        assert_eq!(req.query(), Some("verbose=1"));
        assert_eq!(req.remote_addr(), None);
    }
}
