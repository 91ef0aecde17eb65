mod common;

use std::time::Duration;

use mvc::{
    BoxError, Binder, Controller, HttpError, Method, Request, ResponseWriter, Router, StatusCode,
    Validate, async_trait,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, PartialEq)]
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
struct Created {
    id: u64,
    name: String,
    qty: u32,
}

/// Decodes a JSON item and answers with the stored record.
struct CreateItem {
    binder: Binder,
}

#[async_trait]
impl Controller for CreateItem {
    async fn action(&self, w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError> {
        let item: NewItem = self.binder.scan_json_body(req).await?;
        let created = Created { id: 1, name: item.name, qty: item.qty };
        self.binder.write_json_response(w, &created, Some(StatusCode::CREATED))
    }
}

#[derive(Deserialize)]
struct Page {
    page: u32,
    size: Option<u32>,
}

#[derive(Serialize)]
struct Listing {
    page: u32,
    size: u32,
    items: Vec<&'static str>,
}

struct ListItems {
    binder: Binder,
}

#[async_trait]
impl Controller for ListItems {
    async fn action(&self, w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError> {
        let page: Page = self.binder.scan_query(req)?;
        let listing = Listing { page: page.page, size: page.size.unwrap_or(10), items: vec!["widget"] };
        self.binder.write_json_response(w, &listing, None)
    }
}

/// Sends the decoded item straight back.
struct EchoItem {
    binder: Binder,
}

#[async_trait]
impl Controller for EchoItem {
    async fn action(&self, w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError> {
        let item: NewItem = self.binder.scan_json_body(req).await?;
        self.binder.write_json_response(w, &item, None)
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
struct Order {
    sku: String,
    qty: u32,
    #[serde(default)]
    tag: Vec<String>,
}

/// Binds an urlencoded order form and answers with it as JSON.
struct SubmitOrder {
    binder: Binder,
}

#[async_trait]
impl Controller for SubmitOrder {
    async fn action(&self, w: &mut ResponseWriter, req: &mut Request) -> Result<(), HttpError> {
        let order: Order = self.binder.scan_form(req).await?;
        self.binder.write_json_response(w, &order, Some(StatusCode::ACCEPTED))
    }
}

fn router() -> Router {
    Router::new()
        .route("/items", &[Method::POST], CreateItem { binder: Binder::default() })
        .route("/items", &[Method::GET], ListItems { binder: Binder::default() })
        .route("/echo", &[Method::POST], EchoItem { binder: Binder::default() })
        .route("/orders", &[Method::POST, Method::GET], SubmitOrder { binder: Binder::default() })
}

const FORM: (&str, &str) = ("content-type", "application/x-www-form-urlencoded");

const JSON: (&str, &str) = ("content-type", "application/json");

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let (server, addr, _) = common::start(router()).await;

    let reply = common::send(addr, "POST", "/items", &[JSON], r#"{"bad": }"#).await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.header("content-type"), Some("text/plain; charset=utf-8"));

    server.shutdown_timeout(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn invalid_record_reports_generic_validation_error() {
    let (server, addr, _) = common::start(router()).await;

    let reply = common::send(addr, "POST", "/items", &[JSON], r#"{"name":"","qty":3}"#).await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body, "Schema validation error");

    server.shutdown_timeout(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn valid_record_round_trips_with_explicit_status() {
    let (server, addr, _) = common::start(router()).await;

    let reply = common::send(addr, "POST", "/items", &[JSON], r#"{"name":"bolt","qty":3}"#).await;
    assert_eq!(reply.status, 201);
    assert_eq!(reply.header("content-type"), Some("application/json"));

    let body: serde_json::Value = serde_json::from_str(&reply.body).unwrap();
    assert_eq!(body, serde_json::json!({ "id": 1, "name": "bolt", "qty": 3 }));

    server.shutdown_timeout(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn json_response_defaults_to_ok() {
    let (server, addr, _) = common::start(router()).await;

    let reply = common::get(addr, "/items?page=2").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("content-type"), Some("application/json"));
    assert_eq!(reply.body, r#"{"page":2,"size":10,"items":["widget"]}"#);

    let reply = common::get(addr, "/items?page=two").await;
    assert_eq!(reply.status, 400);

    server.shutdown_timeout(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn echoed_record_equals_the_one_sent() {
    let (server, addr, _) = common::start(router()).await;

    let sent = NewItem { name: "hex \"nut\" \u{2013} m8".into(), qty: 12 };
    let body = serde_json::to_string(&sent).unwrap();
    let reply = common::send(addr, "POST", "/echo", &[JSON], &body).await;
    assert_eq!(reply.status, 200);

    let received: NewItem = serde_json::from_str(&reply.body).unwrap();
    assert_eq!(received, sent);

    server.shutdown_timeout(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn urlencoded_form_binds_through_a_controller() {
    let (server, addr, _) = common::start(router()).await;

    let reply = common::send(addr, "POST", "/orders", &[FORM], "sku=ab%2F1&qty=2&tag=red&tag=big+one").await;
    assert_eq!(reply.status, 202);
    let order: Order = serde_json::from_str(&reply.body).unwrap();
    assert_eq!(
        order,
        Order { sku: "ab/1".into(), qty: 2, tag: vec!["red".into(), "big one".into()] },
    );

    let reply = common::send(addr, "POST", "/orders", &[FORM], "sku=x&qty=1&qty=3").await;
    assert_eq!(reply.status, 202);
    let order: Order = serde_json::from_str(&reply.body).unwrap();
    assert_eq!(order.qty, 3);
    assert!(order.tag.is_empty());

    server.shutdown_timeout(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn form_errors_are_bad_requests() {
    let (server, addr, _) = common::start(router()).await;

    let reply = common::send(addr, "POST", "/orders", &[FORM], "sku=x&qty=lots").await;
    assert_eq!(reply.status, 400);

    // Bodies of other methods and content types are not read.
    let reply = common::send(addr, "POST", "/orders", &[JSON], "sku=x&qty=1").await;
    assert_eq!(reply.status, 400);
    let reply = common::send(addr, "GET", "/orders", &[FORM], "sku=x&qty=1").await;
    assert_eq!(reply.status, 400);

    server.shutdown_timeout(Duration::from_secs(1)).await.unwrap();
}
