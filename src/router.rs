//! Radix-tree router and dispatcher.
//!
//! One tree per HTTP method, O(path-length) lookup via [`matchit`]. The router
//! also owns the middleware chain and is the single place where an
//! [`HttpError`] becomes a wire response.
//!
//! Per request:
//!
//! 1. Match method + path. No path match → `404`. Path matched under another
//!    method → `405` with `Allow`. Neither runs any middleware.
//! 2. Run the middleware in registration order.
//! 3. Run the controller.
//! 4. The first stage to return an error ends the request: its status and
//!    cause message are written as a plain-text response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::header::{ALLOW, CONTENT_TYPE, HeaderValue, X_CONTENT_TYPE_OPTIONS};
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use matchit::Router as MatchitRouter;
use tracing::{debug, error};

use crate::controller::{BoxedController, Controller};
use crate::error::{BoxError, Error, HttpError};
use crate::middleware::{BoxedMiddleware, Chain, Middleware};
use crate::request::Request;
use crate::response::{ContentType, HttpResponse, ResponseWriter};

const NOT_FOUND_BODY: &str = "404 page not found";

/// A registered `(pattern, methods, controller)` binding.
struct Route {
    pattern: String,
    controller: BoxedController,
}

/// The application router.
///
/// Build it during setup, then hand it to [`Server::new`](crate::Server::new).
/// From then on it is shared read-only by every in-flight request, so routes
/// and middleware can no longer change.
///
/// ```rust,no_run
/// # use mvc::{async_trait, Controller, HttpError, Method, Request, ResponseWriter, Router};
/// # struct ShowItem;
/// # #[async_trait]
/// # impl Controller for ShowItem {
/// #     async fn action(&self, _: &mut ResponseWriter, _: &mut Request) -> Result<(), HttpError> { Ok(()) }
/// # }
/// let mut router = Router::new();
/// router.add_route("/items/{id}", &[Method::GET, Method::HEAD], ShowItem)?;
/// # Ok::<(), mvc::Error>(())
/// ```
pub struct Router {
    routes: Vec<Route>,
    trees: HashMap<Method, MatchitRouter<usize>>,
    middleware: Vec<BoxedMiddleware>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new(), trees: HashMap::new(), middleware: Vec::new() }
    }

    /// Appends `middleware` to the chain. Middleware runs in the order it was
    /// added, for every matched route.
    pub fn add_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Binds `controller` to `pattern` for every method in `methods`.
    ///
    /// Patterns use `{name}` for a segment placeholder and `{*name}` for a
    /// trailing catch-all; [`Request::param`] retrieves them.
    ///
    /// Fails without registering anything if `methods` is empty or if the
    /// pattern conflicts with an earlier registration for one of the methods.
    pub fn add_route(
        &mut self,
        pattern: &str,
        methods: &[Method],
        controller: impl Controller,
    ) -> Result<&mut Self, Error> {
        if methods.is_empty() {
            return Err(Error::NoMethods(pattern.to_owned()));
        }

        let index = self.routes.len();
        let mut staged = Vec::with_capacity(methods.len());
        for method in methods {
            if staged.iter().any(|(m, _)| m == method) {
                continue;
            }
            let mut tree = self.trees.get(method).cloned().unwrap_or_default();
            tree.insert(pattern, index).map_err(|source| Error::Route {
                pattern: pattern.to_owned(),
                source,
            })?;
            staged.push((method.clone(), tree));
        }

        self.trees.extend(staged);
        self.routes.push(Route {
            pattern: pattern.to_owned(),
            controller: Arc::new(controller),
        });
        Ok(self)
    }

    /// Chaining variant of [`add_route`](Self::add_route).
    ///
    /// # Panics
    ///
    /// Panics on the same conditions `add_route` reports as errors.
    pub fn route(mut self, pattern: &str, methods: &[Method], controller: impl Controller) -> Self {
        if let Err(e) = self.add_route(pattern, methods, controller) {
            panic!("{e}");
        }
        self
    }

    /// Chaining variant of [`add_middleware`](Self::add_middleware).
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.add_middleware(middleware);
        self
    }

    /// Routes one request through the middleware chain and its controller.
    pub async fn dispatch<B>(&self, req: http::Request<B>) -> HttpResponse
    where
        B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let started = Instant::now();
        let (parts, body) = req.into_parts();

        let (route, params) = match self.lookup(&parts.method, parts.uri.path()) {
            Lookup::Found(route, params) => (route, params),
            Lookup::MethodNotAllowed(allowed) => {
                debug!(method = %parts.method, path = parts.uri.path(), "method not allowed");
                return method_not_allowed(&allowed);
            }
            Lookup::NotFound => {
                debug!(method = %parts.method, path = parts.uri.path(), "no route matched");
                return not_found();
            }
        };

        let mut req = Request::new(parts, body.map_err(Into::into).boxed(), params);
        let mut w = ResponseWriter::new();
        let mut chain = Chain::new(&self.middleware);

        let outcome = match chain.run(&mut w, &mut req).await {
            Ok(()) => route.controller.action(&mut w, &mut req).await,
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            write_error(&mut w, &err, &route.pattern);
        }

        let response = w.into_response();
        debug!(
            method = %req.method(),
            path = req.path(),
            route = %route.pattern,
            middleware = chain.entered(),
            status = response.status().as_u16(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "request dispatched"
        );
        response
    }

    fn lookup(&self, method: &Method, path: &str) -> Lookup<'_> {
        if let Some(matched) = self.trees.get(method).and_then(|tree| tree.at(path).ok()) {
            let params = matched
                .params
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Lookup::Found(&self.routes[*matched.value], params);
        }

        let mut allowed: Vec<&Method> = self
            .trees
            .iter()
            .filter(|(m, tree)| *m != method && tree.at(path).is_ok())
            .map(|(m, _)| m)
            .collect();
        if allowed.is_empty() {
            return Lookup::NotFound;
        }
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Lookup::MethodNotAllowed(allowed)
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

enum Lookup<'a> {
    Found(&'a Route, HashMap<String, String>),
    MethodNotAllowed(Vec<&'a Method>),
    NotFound,
}

// ── Error translation ─────────────────────────────────────────────────────────

/// Writes `err` as the response: its status, and its cause's message as a
/// plain-text body.
///
/// A stage that already wrote before failing broke its contract. The first
/// status stays committed and the message is appended to whatever was written.
fn write_error(w: &mut ResponseWriter, err: &HttpError, pattern: &str) {
    if w.is_written() {
        error!(
            route = pattern,
            status = %err.status(),
            error = %err,
            "stage returned an error after writing a response"
        );
    }
    let headers = w.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(ContentType::Text.as_str()));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    w.write_header(err.status());
    w.write(err.to_string().as_bytes());
}

fn not_found() -> HttpResponse {
    let mut w = ResponseWriter::new();
    w.set_content_type(ContentType::Text);
    w.headers_mut().insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    w.write_header(StatusCode::NOT_FOUND);
    w.write(NOT_FOUND_BODY.as_bytes());
    w.into_response()
}

fn method_not_allowed(allowed: &[&Method]) -> HttpResponse {
    let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
    let mut w = ResponseWriter::new();
    if let Ok(value) = HeaderValue::from_str(&allow) {
        w.headers_mut().insert(ALLOW, value);
    }
    w.write_header(StatusCode::METHOD_NOT_ALLOWED);
    w.into_response()
}
