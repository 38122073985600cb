//! The hyper `Service` in front of the [`Gateway`].
//!
//! [`GatewayService`] handles:
//!
//! 1. Health check interception (`GET /health`, `GET /_health`)
//! 2. Method filtering (only `GET` is served)
//! 3. Routing to the download (`/d/...`) and proxy (`/p/...`) entry points
//! 4. Running the gateway in its own task, so a slow client never blocks the
//!    connection driver and a dropped connection stops the copy
//! 5. Common response headers (`x-request-id`, `Server`)

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use http::header::{ALLOW, CONTENT_TYPE, HeaderValue, SERVER};
use http::{Method, StatusCode};
use hyper::service::Service;
use tracing::{debug, error};
use uuid::Uuid;

use crate::body::GatewayBody;
use crate::error::error_page;
use crate::gateway::Gateway;
use crate::request::{RequestContext, route};
use crate::sink;

/// Header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-connection hyper service.
#[derive(Debug, Clone)]
pub struct GatewayService {
    gateway: Arc<Gateway>,
    peer: Option<SocketAddr>,
}

impl GatewayService {
    /// A service over `gateway` with no known peer.
    #[must_use]
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            peer: None,
        }
    }

    /// A copy of this service for a connection from `peer`.
    #[must_use]
    pub fn for_peer(&self, peer: SocketAddr) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            peer: Some(peer),
        }
    }
}

impl<B> Service<http::Request<B>> for GatewayService
where
    B: Send + 'static,
{
    type Response = http::Response<GatewayBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<B>) -> Self::Future {
        let gateway = Arc::clone(&self.gateway);
        let peer = self.peer;

        Box::pin(async move {
            let request_id = Uuid::new_v4().to_string();
            let response = process_request(req, gateway, peer, &request_id).await;
            Ok(add_common_headers(response, &request_id))
        })
    }
}

async fn process_request<B>(
    req: http::Request<B>,
    gateway: Arc<Gateway>,
    peer: Option<SocketAddr>,
    request_id: &str,
) -> http::Response<GatewayBody> {
    let (parts, _body) = req.into_parts();
    let method = parts.method;
    let uri = parts.uri;
    debug!(%method, %uri, request_id, "processing request");

    if is_health_check(&method, uri.path()) {
        return health_check_response();
    }
    if method != Method::GET {
        let mut response = page_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET"));
        return response;
    }
    let Some((entry, path)) = route(uri.path()) else {
        return page_response(StatusCode::NOT_FOUND, "not found");
    };

    let ctx = RequestContext::new(
        entry,
        method,
        path,
        uri.query(),
        parts.headers,
        peer.map(|p| p.ip()),
        request_id.to_owned(),
    );
    let (sink, pending) = sink::channel();
    let task = tokio::spawn(async move { gateway.handle(ctx, sink).await });

    match pending.into_response().await {
        Some(response) => response,
        None => {
            // The handler ended without committing a response; it panicked.
            if let Err(err) = task.await {
                error!(request_id, error = %err, "request handler failed");
            }
            page_response(StatusCode::INTERNAL_SERVER_ERROR, "request handler failed")
        }
    }
}

fn is_health_check(method: &Method, path: &str) -> bool {
    *method == Method::GET && (path == "/health" || path == "/_health")
}

fn health_check_response() -> http::Response<GatewayBody> {
    let mut response = http::Response::new(GatewayBody::from_string(
        r#"{"status":"running","service":"relaygate"}"#,
    ));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn page_response(status: StatusCode, message: &str) -> http::Response<GatewayBody> {
    let mut response = http::Response::new(GatewayBody::from_string(error_page(status, message)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn add_common_headers(
    mut response: http::Response<GatewayBody>,
    request_id: &str,
) -> http::Response<GatewayBody> {
    let headers = response.headers_mut();
    if let Ok(hv) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, hv);
    }
    headers.insert(SERVER, HeaderValue::from_static("RelayGate"));
    response
}
