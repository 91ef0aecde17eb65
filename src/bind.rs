//! Binding helpers: request data in, typed records out, and back.
//!
//! Every helper reports failure as an [`HttpError`] ready to be returned from
//! a controller with `?`. Input problems are `400`; failing to encode a
//! response is `500`.

use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::HttpError;
use crate::request::Request;
use crate::response::{ContentType, ResponseWriter};
use crate::schema::{SchemaDecoder, Values, parse_values};
use crate::validate::Validate;

/// Upper bound on an urlencoded form body.
pub const MAX_FORM_BYTES: usize = 10 << 20;

const SCHEMA_VALIDATION_ERROR: &str = "Schema validation error";

/// Scans query strings, route placeholders, form and JSON bodies into typed
/// records, and writes typed records back as JSON.
///
/// A `Binder` owns the [`SchemaDecoder`] it was built with. Controllers
/// typically keep one as a field.
///
/// ```rust
/// use mvc::{async_trait, Binder, Controller, HttpError, Request, ResponseWriter};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Deserialize)]
/// struct ItemVars { id: u64 }
///
/// #[derive(Serialize)]
/// struct Item { id: u64, name: &'static str }
///
/// struct ShowItem { binder: Binder }
///
/// #[async_trait]
/// impl Controller for ShowItem {
///     async fn action(&self, w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError> {
///         let vars: ItemVars = self.binder.scan_vars(req)?;
///         self.binder.write_json_response(w, &Item { id: vars.id, name: "widget" }, None)
///     }
/// }
/// ```
#[derive(Clone, Debug, Default)]
pub struct Binder {
    decoder: SchemaDecoder,
}

impl Binder {
    pub fn new(decoder: SchemaDecoder) -> Self {
        Self { decoder }
    }

    pub fn decoder(&self) -> &SchemaDecoder {
        &self.decoder
    }

    /// Decodes the URI query string into `T`.
    pub fn scan_query<T: DeserializeOwned>(&self, req: &Request) -> Result<T, HttpError> {
        let values = req.query().map(parse_values).unwrap_or_default();
        self.decode(&values)
    }

    /// Decodes the route's named placeholders into `T`.
    pub fn scan_vars<T: DeserializeOwned>(&self, req: &Request) -> Result<T, HttpError> {
        let values: Values = req
            .params()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.decode(&values)
    }

    /// Decodes an `application/x-www-form-urlencoded` body into `T`.
    ///
    /// Only `POST`, `PUT` and `PATCH` bodies with that content type are read
    /// (up to [`MAX_FORM_BYTES`]); any other request decodes from no values.
    pub async fn scan_form<T: DeserializeOwned>(&self, req: &mut Request) -> Result<T, HttpError> {
        let values = form_values(req).await?;
        self.decode(&values)
    }

    /// Decodes the body as JSON into `T`, then runs `T`'s [`Validate`] check.
    pub async fn scan_json_body<T>(&self, req: &mut Request) -> Result<T, HttpError>
    where
        T: DeserializeOwned + Validate,
    {
        let body = req.bytes().await.map_err(HttpError::bad_request)?;
        let record: T = serde_json::from_slice(&body).map_err(HttpError::bad_request)?;

        match record.validate() {
            Ok(true) => Ok(record),
            Ok(false) => Err(HttpError::bad_request(SCHEMA_VALIDATION_ERROR)),
            Err(e) => Err(HttpError::new(StatusCode::BAD_REQUEST, e)),
        }
    }

    /// Writes `record` as a JSON response with `status` (default `200 OK`).
    ///
    /// The record is encoded before anything is written, so an encoding
    /// failure leaves `w` untouched and comes back as a `500`.
    pub fn write_json_response<T: Serialize + ?Sized>(
        &self,
        w: &mut ResponseWriter,
        record: &T,
        status: Option<StatusCode>,
    ) -> Result<(), HttpError> {
        let body = serde_json::to_vec(record).map_err(HttpError::internal)?;
        w.set_content_type(ContentType::Json);
        w.write_header(status.unwrap_or(StatusCode::OK));
        w.write(&body);
        Ok(())
    }

    fn decode<T: DeserializeOwned>(&self, values: &[(String, String)]) -> Result<T, HttpError> {
        self.decoder.decode(values).map_err(HttpError::bad_request)
    }
}

async fn form_values(req: &mut Request) -> Result<Values, HttpError> {
    if !matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH) {
        return Ok(Values::new());
    }
    if !is_urlencoded(req.headers().get(CONTENT_TYPE)) {
        return Ok(Values::new());
    }

    let body = req
        .bytes_limited(MAX_FORM_BYTES)
        .await
        .map_err(HttpError::bad_request)?;
    let body = std::str::from_utf8(&body).map_err(HttpError::bad_request)?;
    Ok(parse_values(body))
}

fn is_urlencoded(content_type: Option<&HeaderValue>) -> bool {
    content_type
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media| {
            media.trim().eq_ignore_ascii_case(ContentType::FormData.as_str())
        })
}
