//! Controller trait and type erasure.
//!
//! # How controllers are stored
//!
//! The router holds controllers of *different* types in one route table, so
//! each one is erased behind `Arc<dyn Controller>` at registration time:
//!
//! ```text
//! impl Controller for ShowItem { … }          ← user writes this
//!        ↓ router.add_route("/items/{id}", &[Method::GET], ShowItem)
//! Arc::new(ShowItem)                         ← BoxedController
//!        ↓  shared by every in-flight request
//! controller.action(&mut w, &mut req)        ← one vtable dispatch
//! ```
//!
//! The only runtime cost per request is **one Arc clone** (atomic inc) plus
//! **one virtual call**.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HttpError;
use crate::request::Request;
use crate::response::ResponseWriter;

/// The unit bound to a route that produces the full response.
///
/// - `Ok(())` means the response has been written to `w`. The dispatcher
///   adds nothing.
/// - `Err(e)` means nothing has been written. The dispatcher answers with
///   `e.status()` and the cause's message as a plain-text body.
///
/// A single controller value serves every request routed to it, possibly
/// concurrently, so any mutable state it keeps needs its own
/// synchronization.
///
/// ```rust
/// use mvc::{async_trait, Controller, HttpError, Request, ResponseWriter, StatusCode};
///
/// struct ShowItem;
///
/// #[async_trait]
/// impl Controller for ShowItem {
///     async fn action(&self, w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError> {
///         let id = req
///             .param("id")
///             .ok_or_else(|| HttpError::new(StatusCode::NOT_FOUND, "no item"))?;
///         w.write(format!("item {id}").as_bytes());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Controller: Send + Sync + 'static {
    async fn action(&self, w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError>;
}

/// A type-erased controller shared across concurrent requests.
pub(crate) type BoxedController = Arc<dyn Controller>;

#[async_trait]
impl<C: Controller + ?Sized> Controller for Arc<C> {
    async fn action(&self, w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError> {
        (**self).action(w, req).await
    }
}
