//! Middleware layer.
//!
//! A middleware is a gate in front of the matched controller. It has the same
//! shape as a [`Controller`](crate::Controller), read differently:
//!
//! - `Ok(())` means "proceed to the next stage".
//! - `Err(e)` short-circuits: no later middleware and no controller runs, and
//!   the dispatcher answers with `e`.
//!
//! Middleware is the right place for cross-cutting concerns: authentication
//! header inspection, request-id injection, per-request context in
//! [`Request::extensions_mut`](crate::Request::extensions_mut), or response
//! headers every route should carry.
//!
//! The chain is a flat list walked by an index cursor ([`Chain`]), in
//! registration order, for every matched request.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::HttpError;
use crate::request::Request;
use crate::response::ResponseWriter;

/// A pre-processing stage run before every matched controller.
///
/// ```rust
/// use mvc::{async_trait, HttpError, Middleware, Request, ResponseWriter, StatusCode};
///
/// struct RequireToken;
///
/// #[async_trait]
/// impl Middleware for RequireToken {
///     async fn handle(&self, _w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError> {
///         match req.header("authorization") {
///             Some(_) => Ok(()),
///             None => Err(HttpError::new(StatusCode::UNAUTHORIZED, "missing token")),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError>;
}

pub(crate) type BoxedMiddleware = Arc<dyn Middleware>;

#[async_trait]
impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    async fn handle(&self, w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError> {
        (**self).handle(w, req).await
    }
}

/// Cursor over the registered middleware for one request.
pub(crate) struct Chain<'a> {
    stages: &'a [BoxedMiddleware],
    cursor: usize,
}

impl<'a> Chain<'a> {
    pub(crate) fn new(stages: &'a [BoxedMiddleware]) -> Self {
        Self { stages, cursor: 0 }
    }

    /// Runs every remaining stage in order, stopping at the first error.
    pub(crate) async fn run(
        &mut self,
        w: &mut ResponseWriter,
        req: &mut Request,
    ) -> Result<(), HttpError> {
        while let Some(stage) = self.stages.get(self.cursor) {
            self.cursor += 1;
            if let Err(err) = stage.handle(w, req).await {
                debug!(
                    stage = self.cursor - 1,
                    status = %err.status(),
                    "middleware short-circuited the chain"
                );
                return Err(err);
            }
        }
        Ok(())
    }

    /// Number of stages that have been entered.
    pub(crate) fn entered(&self) -> usize {
        self.cursor
    }
}
