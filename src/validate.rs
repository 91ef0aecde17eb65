//! Record validation run after a JSON body has been decoded.

use crate::error::BoxError;

/// Declares the constraints a decoded record must satisfy.
///
/// [`Binder::scan_json_body`](crate::Binder::scan_json_body) calls
/// [`validate`](Validate::validate) on every record it decodes:
///
/// - `Ok(true)` accepts the record.
/// - `Ok(false)` rejects it with `400` and the body `Schema validation error`.
///   Which field failed is not reported.
/// - `Err(e)` rejects it with `400` and `e`'s message.
///
/// The default accepts everything, so records without constraints need only
/// an empty impl.
///
/// ```rust
/// use mvc::{BoxError, Validate};
///
/// struct NewItem { name: String, qty: u32 }
///
/// impl Validate for NewItem {
///     fn validate(&self) -> Result<bool, BoxError> {
///         Ok(!self.name.is_empty() && self.qty > 0)
///     }
/// }
/// ```
pub trait Validate {
    fn validate(&self) -> Result<bool, BoxError> {
        Ok(true)
    }
}

impl Validate for serde_json::Value {}

impl<T: Validate> Validate for Vec<T> {
    fn validate(&self) -> Result<bool, BoxError> {
        for item in self {
            if !item.validate()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl<T: Validate> Validate for Option<T> {
    fn validate(&self) -> Result<bool, BoxError> {
        self.as_ref().map_or(Ok(true), Validate::validate)
    }
}
