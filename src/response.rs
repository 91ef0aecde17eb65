//! The response sink handed to controllers and middleware.
//!
//! [`ResponseWriter`] follows the classic writer model: set headers, commit a
//! status with [`write_header`](ResponseWriter::write_header), then stream the
//! body with [`write`](ResponseWriter::write). Writing body bytes without a
//! status commits `200 OK`. Once committed, the status and headers are fixed.

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use tracing::warn;

/// The response type produced by dispatch and served by hyper.
pub type HttpResponse = http::Response<Full<Bytes>>;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseWriter::set_content_type`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    FormData,     // application/x-www-form-urlencoded
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// Buffered response sink.
///
/// ```rust
/// use mvc::{ContentType, ResponseWriter, StatusCode};
///
/// let mut w = ResponseWriter::new();
/// w.set_content_type(ContentType::Text);
/// w.write_header(StatusCode::CREATED);
/// w.write(b"made it");
/// assert_eq!(w.status(), Some(StatusCode::CREATED));
/// ```
#[derive(Debug, Default)]
pub struct ResponseWriter {
    headers: HeaderMap,
    committed: Option<(StatusCode, HeaderMap)>,
    body: BytesMut,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Headers that will be sent when the status is committed.
    ///
    /// Changes made after [`write_header`](Self::write_header) or the first
    /// [`write`](Self::write) have no effect on the response.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The headers of the response: the committed set once written, the
    /// pending set before.
    pub fn headers(&self) -> &HeaderMap {
        match &self.committed {
            Some((_, headers)) => headers,
            None => &self.headers,
        }
    }

    pub fn set_content_type(&mut self, content_type: ContentType) {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
    }

    /// Commits the status line and the current headers.
    ///
    /// Only the first call counts; later calls are logged and ignored.
    pub fn write_header(&mut self, status: StatusCode) {
        if let Some((committed, _)) = &self.committed {
            warn!(%committed, ignored = %status, "superfluous write_header call");
            return;
        }
        self.committed = Some((status, self.headers.clone()));
    }

    /// Appends `data` to the body, committing `200 OK` first if nothing was
    /// committed yet.
    pub fn write(&mut self, data: &[u8]) {
        if self.committed.is_none() {
            self.write_header(StatusCode::OK);
        }
        self.body.extend_from_slice(data);
    }

    /// `true` once a status has been committed.
    pub fn is_written(&self) -> bool {
        self.committed.is_some()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.committed.as_ref().map(|(status, _)| *status)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Finalizes into a hyper response. A writer nobody wrote to yields an
    /// empty `200 OK`.
    pub(crate) fn into_response(self) -> HttpResponse {
        let (status, headers) = self
            .committed
            .unwrap_or((StatusCode::OK, self.headers));
        let mut response = http::Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// Lets serializers stream straight into the body.
impl std::io::Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        ResponseWriter::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
