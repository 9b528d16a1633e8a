use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::compute::ComputeUsageClient;
use crate::error::{ApiError, Error};
use crate::marketplace::MarketplaceClient;
use crate::models::{UsageEvent, UsageEventBatch};
use crate::quota::QuotaService;

/// Maximum request body size (1 MiB).
const MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Shared server state passed to all request handlers.
///
/// Only the adapter selected by the subcommand is mounted; requests for the
/// other adapter's routes fall through to 404.
pub struct ServerState {
    pub metering: Option<MarketplaceClient>,
    pub quota: Option<QuotaService<ComputeUsageClient>>,
    pub request_timeout: Duration,
}

/// Handle an incoming TCP connection.
///
/// Upgrades the connection to HTTP/1.1 and routes requests to the appropriate handler.
pub async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req| {
        let state = state.clone();
        let remote = remote_addr;
        async move { handle_request(req, state, remote).await }
    });

    http1::Builder::new()
        .keep_alive(true)
        .serve_connection(io, service)
        .await?;

    Ok(())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ServerState>,
    remote_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = request_id_from(&req);

    debug!(
        method = %method,
        path = %path,
        remote = %remote_addr,
        request_id = %request_id,
        "Received request"
    );

    let start = std::time::Instant::now();

    let request_timeout = state.request_timeout;
    let response = match tokio::time::timeout(request_timeout, async {
        match (method.clone(), path.as_str()) {
            (Method::POST, "/metering/usageEvent") => match &state.metering {
                Some(client) => handle_usage_event(req, client, &request_id).await,
                None => Ok(not_found_response()),
            },

            (Method::POST, "/metering/batchUsageEvent") => match &state.metering {
                Some(client) => handle_batch_usage_event(req, client, &request_id).await,
                None => Ok(not_found_response()),
            },

            (Method::GET, "/available/gpu") => match &state.quota {
                Some(service) => handle_available_gpu(service, &request_id).await,
                None => Ok(not_found_response()),
            },

            // Liveness / readiness
            (Method::GET, "/healthz") | (Method::GET, "/readyz") => {
                Ok(json_response(StatusCode::OK, r#"{"status":"ok"}"#))
            }

            _ => Ok(not_found_response()),
        }
    })
    .await
    {
        Ok(result) => result,
        Err(_) => {
            warn!(request_id = %request_id, "Request timed out");
            Err(Error::Timeout(request_timeout))
        }
    };

    let duration = start.elapsed();

    match response {
        Ok(resp) => {
            let status = resp.status().as_u16();
            if status >= 400 {
                warn!(
                    method = %method,
                    path = %path,
                    status = status,
                    duration_ms = duration.as_millis(),
                    request_id = %request_id,
                    "Request failed"
                );
            } else {
                info!(
                    method = %method,
                    path = %path,
                    status = status,
                    duration_ms = duration.as_millis(),
                    request_id = %request_id,
                    "Request completed"
                );
            }
            Ok(with_request_id(resp, &request_id))
        }
        Err(e) => {
            let resp = error_to_response(&e, &request_id);
            warn!(
                method = %method,
                path = %path,
                status = resp.status().as_u16(),
                duration_ms = duration.as_millis(),
                request_id = %request_id,
                error = %e,
                "Request error"
            );
            Ok(resp)
        }
    }
}

/// Honor an inbound X-Request-Id header, otherwise generate one.
fn request_id_from(req: &Request<hyper::body::Incoming>) -> String {
    req.headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn require_json(req: &Request<hyper::body::Incoming>) -> Result<(), Error> {
    let content_type = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !content_type.contains("application/json") {
        return Err(Error::Api(ApiError::InvalidRequest {
            message: "Content-Type must be application/json".to_string(),
        }));
    }

    Ok(())
}

async fn handle_usage_event(
    req: Request<hyper::body::Incoming>,
    client: &MarketplaceClient,
    request_id: &str,
) -> Result<Response<Full<Bytes>>, Error> {
    require_json(&req)?;
    let body_bytes = read_body_limited(req.into_body(), MAX_REQUEST_SIZE).await?;

    let event: UsageEvent = match serde_json::from_slice(&body_bytes) {
        Ok(event) => event,
        Err(e) => {
            return Ok(message_response(StatusCode::BAD_REQUEST, &e.to_string()));
        }
    };

    debug!(
        request_id = %request_id,
        dimension = %event.dimension_id,
        quantity = event.quantity,
        "Processing usage event"
    );

    match client.create_usage_event(event).await {
        Ok(response) => {
            let body = serde_json::to_vec(&response)?;
            Ok(json_body_response(StatusCode::OK, body))
        }
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Usage event failed");
            Ok(message_response(StatusCode::BAD_REQUEST, &e.to_string()))
        }
    }
}

async fn handle_batch_usage_event(
    req: Request<hyper::body::Incoming>,
    client: &MarketplaceClient,
    request_id: &str,
) -> Result<Response<Full<Bytes>>, Error> {
    require_json(&req)?;
    let body_bytes = read_body_limited(req.into_body(), MAX_REQUEST_SIZE).await?;

    let batch: UsageEventBatch = match serde_json::from_slice(&body_bytes) {
        Ok(batch) => batch,
        Err(e) => {
            return Ok(message_response(StatusCode::BAD_REQUEST, &e.to_string()));
        }
    };

    debug!(
        request_id = %request_id,
        events = batch.events.len(),
        "Processing usage event batch"
    );

    match client.create_usage_event_batch(batch).await {
        Ok(response) => {
            let body = serde_json::to_vec(&response)?;
            Ok(json_body_response(StatusCode::OK, body))
        }
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Usage event batch failed");
            Ok(message_response(StatusCode::BAD_REQUEST, &e.to_string()))
        }
    }
}

async fn handle_available_gpu(
    service: &QuotaService<ComputeUsageClient>,
    request_id: &str,
) -> Result<Response<Full<Bytes>>, Error> {
    match service.available_gpu().await {
        Ok(gpu) => {
            let body = serde_json::to_vec(&gpu)?;
            Ok(json_body_response(StatusCode::OK, body))
        }
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Available GPU lookup failed");
            Ok(message_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &e.to_string(),
            ))
        }
    }
}

async fn read_body_limited(body: hyper::body::Incoming, max_size: usize) -> Result<Vec<u8>, Error> {
    let collected = body
        .collect()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;

    let bytes = collected.to_bytes();
    if bytes.len() > max_size {
        return Err(Error::Api(ApiError::RequestTooLarge {
            size: bytes.len(),
            max: max_size,
        }));
    }

    Ok(bytes.to_vec())
}

fn json_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn json_body_response(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Build a `{"message": ...}` error body, the shape both controllers return.
fn message_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "message": message }).to_string();
    json_response(status, &body)
}

fn not_found_response() -> Response<Full<Bytes>> {
    message_response(StatusCode::NOT_FOUND, "not found")
}

fn with_request_id(mut resp: Response<Full<Bytes>>, request_id: &str) -> Response<Full<Bytes>> {
    if let Ok(value) = hyper::header::HeaderValue::from_str(request_id) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}

fn error_to_response(error: &Error, request_id: &str) -> Response<Full<Bytes>> {
    let status = match error {
        Error::Api(ApiError::InvalidRequest { .. }) => StatusCode::BAD_REQUEST,
        Error::Api(ApiError::RequestTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        Error::Api(ApiError::UpstreamStatus { .. }) => StatusCode::BAD_GATEWAY,
        Error::Json(_) => StatusCode::BAD_REQUEST,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::Auth(_) | Error::Io(_) | Error::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    with_request_id(message_response(status, &error.to_string()), request_id)
}
