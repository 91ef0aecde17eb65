//! Minimal mvc example: JSON item endpoints behind a token check.
//!
//! Run with:
//!   RUST_LOG=mvc=debug,info cargo run --example basic
//!
//! Try:
//!   curl -H 'authorization: Bearer demo' http://localhost:3000/items/42
//!   curl -H 'authorization: Bearer demo' 'http://localhost:3000/items?page=2'
//!   curl -X POST http://localhost:3000/items \
//!        -H 'authorization: Bearer demo' \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"bolt","qty":3}'
//!   curl -X DELETE http://localhost:3000/items/42      → 401, no token
//!   curl -X PATCH -H 'authorization: Bearer demo' http://localhost:3000/items/42   → 405

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mvc::{
    Binder, BoxError, Controller, HttpError, Method, Middleware, Request, ResponseWriter, Router,
    Server, ServerConfig, StatusCode, Validate, async_trait,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Deserialize)]
struct ItemVars {
    id: u64,
}

#[derive(Deserialize)]
struct Page {
    page: u32,
    size: Option<u32>,
}

#[derive(Deserialize)]
struct NewItem {
    name: String,
    qty: u32,
}

impl Validate for NewItem {
    fn validate(&self) -> Result<bool, BoxError> {
        Ok(!self.name.is_empty() && self.qty > 0)
    }
}

#[derive(Serialize)]
struct Item {
    id: u64,
    name: String,
    qty: u32,
}

// GET /items/{id}
struct ShowItem {
    binder: Binder,
}

#[async_trait]
impl Controller for ShowItem {
    async fn action(&self, w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError> {
        let vars: ItemVars = self.binder.scan_vars(req)?;
        let item = Item { id: vars.id, name: "widget".to_owned(), qty: 1 };
        self.binder.write_json_response(w, &item, None)
    }
}

// GET /items?page=N&size=M
struct ListItems {
    binder: Binder,
}

#[async_trait]
impl Controller for ListItems {
    async fn action(&self, w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError> {
        let page: Page = self.binder.scan_query(req)?;
        let size = page.size.unwrap_or(10);
        let first = u64::from(page.page.saturating_sub(1)) * u64::from(size);
        let items: Vec<Item> = (first..first + u64::from(size))
            .map(|id| Item { id, name: format!("widget-{id}"), qty: 1 })
            .collect();
        self.binder.write_json_response(w, &items, None)
    }
}

// POST /items → 201 Created
struct CreateItem {
    binder: Binder,
    next_id: AtomicU64,
}

#[async_trait]
impl Controller for CreateItem {
    async fn action(&self, w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError> {
        let new: NewItem = self.binder.scan_json_body(req).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let item = Item { id, name: new.name, qty: new.qty };
        self.binder.write_json_response(w, &item, Some(StatusCode::CREATED))
    }
}

// DELETE /items/{id} → 204 No Content
struct DeleteItem;

#[async_trait]
impl Controller for DeleteItem {
    async fn action(&self, w: &mut ResponseWriter, _req: &mut Request) -> Result<(), HttpError> {
        w.write_header(StatusCode::NO_CONTENT);
        Ok(())
    }
}

/// Rejects requests without the demo bearer token.
struct RequireToken;

#[async_trait]
impl Middleware for RequireToken {
    async fn handle(&self, _w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError> {
        match req.header("authorization") {
            Some("Bearer demo") => Ok(()),
            _ => Err(HttpError::new(StatusCode::UNAUTHORIZED, "missing or invalid token")),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), mvc::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let binder = Binder::default();
    let router = Router::new()
        .middleware(RequireToken)
        .route("/items", &[Method::GET], ListItems { binder: binder.clone() })
        .route("/items", &[Method::POST], CreateItem { binder: binder.clone(), next_id: AtomicU64::new(100) })
        .route("/items/{id}", &[Method::GET, Method::HEAD], ShowItem { binder })
        .route("/items/{id}", &[Method::DELETE], DeleteItem);

    let config = ServerConfig::new(":3000")
        .read_header_timeout(Duration::from_secs(5))
        .write_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(60));
    let server = Server::new(config, router);

    let handle = server.clone();
    let drain = tokio::spawn(async move {
        if let Err(e) = mvc::shutdown_signal().await {
            tracing::error!("installing signal handlers: {e}");
            return;
        }
        if let Err(e) = handle.shutdown_timeout(Duration::from_secs(30)).await {
            tracing::warn!("shutdown incomplete: {e}");
        }
    });

    server.run().await?;
    // run returns once the listener is closed; let in-flight requests finish.
    let _ = drain.await;
    Ok(())
}
