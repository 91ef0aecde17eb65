//! # mvc
//!
//! A minimal controller/middleware dispatch layer for HTTP services.
//! Nothing more. Nothing less.
//!
//! ## The contract
//!
//! Application code is written as [`Controller`]s bound to
//! `(pattern, methods)` pairs and [`Middleware`] gates run in front of every
//! matched controller. Both return `Result<(), HttpError>`; the router is the
//! one place an [`HttpError`] turns into a wire response: its status plus the
//! cause's message as plain text.
//!
//! What's in the box:
//!
//! - Radix-tree routing with `{name}` placeholders via [`matchit`], one tree
//!   per method, `404` vs `405` with `Allow`
//! - HTTP/1.1 and HTTP/2 via hyper, optional TLS via rustls
//! - A [`Server`] with an explicit lifecycle and deadline-bounded graceful
//!   shutdown
//! - [`Binder`] helpers that scan query strings, route placeholders, form
//!   and JSON bodies into typed records, and write records back as JSON
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mvc::{async_trait, Binder, Controller, HttpError, Method, Request,
//!           ResponseWriter, Router, Server, ServerConfig, StatusCode};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize)]
//! struct ItemVars { id: u64 }
//!
//! #[derive(Serialize)]
//! struct Item { id: u64 }
//!
//! struct ShowItem { binder: Binder }
//!
//! #[async_trait]
//! impl Controller for ShowItem {
//!     async fn action(&self, w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError> {
//!         let vars: ItemVars = self.binder.scan_vars(req)?;
//!         if vars.id == 0 {
//!             return Err(HttpError::new(StatusCode::NOT_FOUND, "no such item"));
//!         }
//!         self.binder.write_json_response(w, &Item { id: vars.id }, None)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mvc::Error> {
//!     let router = Router::new()
//!         .route("/items/{id}", &[Method::GET], ShowItem { binder: Binder::default() });
//!
//!     Server::new(ServerConfig::new(":3000"), router).run().await
//! }
//! ```

mod bind;
mod config;
mod connection;
mod controller;
mod error;
mod middleware;
mod request;
mod response;
mod router;
mod schema;
mod server;
mod tls;
mod validate;

pub use async_trait::async_trait;
pub use http::{HeaderMap, Method, StatusCode};

pub use bind::{Binder, MAX_FORM_BYTES};
pub use config::{
    ConfigError, ConnContextHook, ConnState, ConnStateHook, DEFAULT_MAX_HEADER_BYTES, ServerConfig,
    TlsConfig,
};
pub use controller::Controller;
pub use error::{BoxError, Error, HttpError};
pub use middleware::Middleware;
pub use request::{BodyError, Request};
pub use response::{ContentType, HttpResponse, ResponseWriter};
pub use router::Router;
pub use schema::{DecodeError, SchemaDecoder, Values, parse_values};
pub use server::{Server, State, shutdown_signal};
pub use tls::TlsError;
pub use validate::Validate;
