//! Structured decoding of flat key/value data into typed records.
//!
//! Query strings, route placeholders, and urlencoded form bodies all reduce to
//! the same shape: an ordered list of `(key, value)` string pairs, where a key
//! may repeat. [`SchemaDecoder`] turns such a list into any
//! [`serde::Deserialize`] record, parsing each value into the field's type.
//!
//! A repeated key fills a sequence field (`Vec<T>`) in order. Bound to a
//! scalar field, the last value wins.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use url::form_urlencoded;

/// Flat, multi-valued string data as it comes off the wire.
pub type Values = Vec<(String, String)>;

/// A value list could not be decoded into the target record.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct DecodeError(#[from] serde_html_form::de::Error);

/// Decodes [`Values`] into typed records.
///
/// Construct one explicitly and hand it to whatever needs it; the
/// [`Binder`](crate::Binder) owns one.
///
/// ```rust
/// use mvc::SchemaDecoder;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Page { page: u32, size: Option<u32> }
///
/// let values = vec![("page".to_owned(), "3".to_owned())];
/// let page: Page = SchemaDecoder::new().decode(&values).unwrap();
/// assert_eq!(page.page, 3);
/// assert_eq!(page.size, None);
/// ```
#[derive(Clone, Debug, Default)]
pub struct SchemaDecoder {
    skip_empty: bool,
}

impl SchemaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop pairs whose value is empty before decoding, so `?size=` leaves an
    /// optional field unset instead of failing to parse `""`.
    pub fn skip_empty(mut self, skip: bool) -> Self {
        self.skip_empty = skip;
        self
    }

    pub fn decode<T: DeserializeOwned>(&self, values: &[(String, String)]) -> Result<T, DecodeError> {
        let pairs: Vec<_> = values
            .iter()
            .filter(|(_, value)| !(self.skip_empty && value.is_empty()))
            .collect();

        let err = match serde_html_form::from_str(&encode(pairs.iter().copied())) {
            Ok(record) => return Ok(record),
            Err(err) => err,
        };

        // A repeated key bound to a scalar field: keep only the last value.
        let mut seen = HashSet::new();
        let mut last: Vec<_> = pairs
            .iter()
            .rev()
            .filter(|(key, _)| seen.insert(key))
            .copied()
            .collect();
        if last.len() == pairs.len() {
            return Err(err.into());
        }
        last.reverse();
        Ok(serde_html_form::from_str(&encode(last.into_iter()))?)
    }
}

fn encode<'a>(pairs: impl Iterator<Item = &'a (String, String)>) -> String {
    let mut encoded = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        encoded.append_pair(key, value);
    }
    encoded.finish()
}

/// Parses an urlencoded string (`a=1&b=two`) into [`Values`]. Malformed
/// escapes are decoded leniently.
pub fn parse_values(input: &str) -> Values {
    form_urlencoded::parse(input.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}
