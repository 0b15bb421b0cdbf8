//! HTTP transport
//!
//! Maps routes onto service operations. Request bodies are capped at the
//! configured payload ceiling, compute runs on the blocking pool, and every
//! response carries a `Server-Timing` header with the compute duration.
//!
//! # Endpoints
//!
//! - `GET /env` - Process and wire settings
//! - `GET /audio/formats` - Readable and writable containers
//! - `GET /audio/formats/:format` - Subtypes of one container
//! - `POST /audio/decode` - Container bytes to samples
//! - `POST /audio/encode` - Samples to container bytes
//! - `POST /analysis/pitch/fast` - Fast pitch track
//! - `POST /analysis/pitch/precise` - Precise pitch track
//! - `POST /analysis/full` - Pitch, envelope and aperiodicity
//! - `POST /analysis/synthesize` - Features back to a signal
//! - `POST /render/plot` - Tensors to a PNG
//!
//! The browser client's paths are served as aliases: `/soundfile/available[/:format]`,
//! `/soundfile/{read,write}` and `/pyworld/{dio,harvest,all,synthesize,savefig}`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{WorldBridgeError, Result};
use crate::invocation::{invoke_timed, TimedResponse, MSGPACK_CONTENT_TYPE};
use crate::service::Service;

const SERVER_TIMING: &str = "server-timing";

/// Failure body
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    kind: &'a str,
    message: String,
}

fn error_response(err: &WorldBridgeError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody {
        kind: err.kind(),
        message: err.to_string(),
    };
    match crate::tensor::encode(&body) {
        Ok(bytes) => (status, [(header::CONTENT_TYPE, MSGPACK_CONTENT_TYPE)], bytes).into_response(),
        Err(_) => (status, err.to_string()).into_response(),
    }
}

fn timed_response(timed: TimedResponse) -> Response {
    let content_type = timed.payload.content_type();
    let timing = HeaderValue::from_str(&timed.timing.server_timing_header())
        .unwrap_or_else(|_| HeaderValue::from_static("cpu;dur=0"));
    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        timed.payload.into_bytes(),
    )
        .into_response();
    response.headers_mut().insert(SERVER_TIMING, timing);
    response
}

fn body_error(rejection: BytesRejection) -> WorldBridgeError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        WorldBridgeError::payload_too_large(rejection.body_text())
    } else {
        WorldBridgeError::malformed_request(rejection.body_text())
    }
}

/// Run one invocation on the blocking pool and turn the outcome into a response
async fn dispatch<F>(service: Arc<Service>, body: std::result::Result<Bytes, BytesRejection>, call: F) -> Response
where
    F: FnOnce(&Service, &[u8]) -> Result<TimedResponse> + Send + 'static,
{
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let err = body_error(rejection);
            log::warn!("Rejected request body: {}", err);
            return error_response(&err);
        }
    };

    match tokio::task::spawn_blocking(move || call(&service, &body)).await {
        Ok(Ok(timed)) => timed_response(timed),
        Ok(Err(err)) => error_response(&err),
        Err(join) => {
            log::error!("Worker task failed: {}", join);
            error_response(&WorldBridgeError::io(format!("Worker task failed: {}", join)))
        }
    }
}

async fn environment(State(service): State<Arc<Service>>) -> Response {
    dispatch(service, Ok(Bytes::new()), |s, body| invoke_timed(&s.environment(), body)).await
}

async fn list_formats(State(service): State<Arc<Service>>) -> Response {
    dispatch(service, Ok(Bytes::new()), |s, body| invoke_timed(&s.list_formats(), body)).await
}

async fn list_subtypes(State(service): State<Arc<Service>>, Path(format): Path<String>) -> Response {
    dispatch(service, Ok(Bytes::new()), move |s, body| {
        invoke_timed(&s.list_subtypes(&format), body)
    })
    .await
}

async fn decode_audio(
    State(service): State<Arc<Service>>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    dispatch(service, body, |s, body| invoke_timed(&s.decode_audio(), body)).await
}

async fn encode_audio(
    State(service): State<Arc<Service>>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    dispatch(service, body, |s, body| invoke_timed(&s.encode_audio(), body)).await
}

async fn pitch_fast(
    State(service): State<Arc<Service>>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    dispatch(service, body, |s, body| invoke_timed(&s.pitch_fast(), body)).await
}

async fn pitch_precise(
    State(service): State<Arc<Service>>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    dispatch(service, body, |s, body| invoke_timed(&s.pitch_precise(), body)).await
}

async fn analyze_full(
    State(service): State<Arc<Service>>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    dispatch(service, body, |s, body| invoke_timed(&s.analyze_full(), body)).await
}

async fn synthesize(
    State(service): State<Arc<Service>>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    dispatch(service, body, |s, body| invoke_timed(&s.synthesize(), body)).await
}

async fn render_plot(
    State(service): State<Arc<Service>>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    dispatch(service, body, |s, body| invoke_timed(&s.render_plot(), body)).await
}

/// Create the axum router
pub fn create_router(service: Arc<Service>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::HeaderName::from_static(SERVER_TIMING)]);
    let body_limit = DefaultBodyLimit::max(service.config().max_payload_bytes());

    Router::new()
        .route("/env", get(environment))
        .route("/audio/formats", get(list_formats))
        .route("/audio/formats/:format", get(list_subtypes))
        .route("/audio/decode", post(decode_audio))
        .route("/audio/encode", post(encode_audio))
        .route("/analysis/pitch/fast", post(pitch_fast))
        .route("/analysis/pitch/precise", post(pitch_precise))
        .route("/analysis/full", post(analyze_full))
        .route("/analysis/synthesize", post(synthesize))
        .route("/render/plot", post(render_plot))
        // Paths of the original browser client
        .route("/soundfile/available", get(list_formats))
        .route("/soundfile/available/", get(list_formats))
        .route("/soundfile/available/:format", get(list_subtypes))
        .route("/soundfile/read", post(decode_audio))
        .route("/soundfile/write", post(encode_audio))
        .route("/pyworld/dio", post(pitch_fast))
        .route("/pyworld/harvest", post(pitch_precise))
        .route("/pyworld/all", post(analyze_full))
        .route("/pyworld/synthesize", post(synthesize))
        .route("/pyworld/savefig", post(render_plot))
        .layer(body_limit)
        .layer(cors)
        .with_state(service)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}

/// Start the server and run until interrupted
pub async fn serve(service: Arc<Service>, addr: SocketAddr) -> std::io::Result<()> {
    let router = create_router(service);

    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::tensor::{Tensor, TensorEnvelope};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    fn create_test_service(config: Config) -> Arc<Service> {
        Arc::new(Service::new(Arc::new(config)))
    }

    fn post_request(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", MSGPACK_CONTENT_TYPE)
            .body(Body::from(body))
            .unwrap()
    }

    async fn read_error(response: Response) -> BTreeMap<String, String> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        rmp_serde::from_slice(&bytes).unwrap()
    }

    #[derive(Serialize)]
    struct Signal<'a> {
        data: &'a Tensor,
        fs: f64,
    }

    #[tokio::test]
    async fn test_env_endpoint() {
        let router = create_router(create_test_service(Config::default()));
        let request = Request::builder()
            .method("GET")
            .uri("/env")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], MSGPACK_CONTENT_TYPE);
        assert!(response.headers().contains_key(SERVER_TIMING));
    }

    #[tokio::test]
    async fn test_pitch_endpoint_reports_timing() {
        let router = create_router(create_test_service(Config::default()));
        let x: Vec<f64> = (0..4000).map(|i| (i as f64 * 0.1).sin()).collect();
        let data = Tensor::from_values(vec![4000], &x).unwrap();
        let body = crate::tensor::encode(&Signal { data: &data, fs: 16000.0 }).unwrap();

        let response = router.oneshot(post_request("/analysis/pitch/fast", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let timing = response.headers()[SERVER_TIMING].to_str().unwrap().to_string();
        assert!(timing.starts_with("cpu;dur="), "{}", timing);

        #[derive(serde::Deserialize)]
        struct Reply {
            t: TensorEnvelope,
            f0: TensorEnvelope,
        }
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let reply: Reply = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(reply.t.into_tensor().unwrap().shape(), reply.f0.into_tensor().unwrap().shape());
    }

    #[tokio::test]
    async fn test_missing_parameter_is_422() {
        #[derive(Serialize)]
        struct OnlyFs {
            fs: f64,
        }
        let router = create_router(create_test_service(Config::default()));
        let body = crate::tensor::encode(&OnlyFs { fs: 16000.0 }).unwrap();

        let response = router.oneshot(post_request("/analysis/full", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let error = read_error(response).await;
        assert_eq!(error["kind"], "MissingParameter");
        assert!(error["message"].contains("data"));
    }

    #[tokio::test]
    async fn test_malformed_tensor_is_400() {
        let router = create_router(create_test_service(Config::default()));
        // 3 float64 values need 24 bytes
        let data = rmpv::Value::Map(vec![
            (rmpv::Value::from("shape"), rmpv::Value::Array(vec![rmpv::Value::from(3)])),
            (rmpv::Value::from("dtype"), rmpv::Value::from("float64")),
            (rmpv::Value::from("buffer"), rmpv::Value::Binary(vec![0u8; 16])),
        ]);
        let request = rmpv::Value::Map(vec![
            (rmpv::Value::from("data"), data),
            (rmpv::Value::from("fs"), rmpv::Value::from(16000)),
        ]);
        let mut body = Vec::new();
        rmpv::encode::write_value(&mut body, &request).unwrap();

        let response = router.oneshot(post_request("/analysis/pitch/precise", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_error(response).await["kind"], "MalformedTensor");
    }

    #[tokio::test]
    async fn test_oversized_body_is_413() {
        let mut config = Config::default();
        config.limits.max_payload_bytes = 1024;
        config.limits.spool_memory_bytes = 512;
        let router = create_router(create_test_service(config));

        let response = router
            .oneshot(post_request("/audio/decode", vec![0u8; 4096]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(read_error(response).await["kind"], "PayloadTooLarge");
    }

    #[tokio::test]
    async fn test_unknown_format_is_415() {
        let router = create_router(create_test_service(Config::default()));
        let request = Request::builder()
            .method("GET")
            .uri("/audio/formats/NOPE")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(read_error(response).await["kind"], "UnsupportedFormat");
    }

    #[tokio::test]
    async fn test_decode_garbage_is_rejected() {
        let router = create_router(create_test_service(Config::default()));
        let response = router
            .oneshot(post_request("/audio/decode", b"definitely not audio".to_vec()))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_browser_client_paths_are_aliases() {
        let service = create_test_service(Config::default());
        let router = create_router(service.clone());

        let x: Vec<f64> = (0..4000).map(|i| (i as f64 * 0.1).sin()).collect();
        let data = Tensor::from_values(vec![4000], &x).unwrap();
        let body = crate::tensor::encode(&Signal { data: &data, fs: 16000.0 }).unwrap();
        let response = router.clone().oneshot(post_request("/pyworld/dio", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(SERVER_TIMING));

        let audio = crate::audio::AudioMatrix::from_mono(ndarray::Array1::from(x));
        let wav = service.codec().encode(&audio, 16000, None, None).unwrap();
        let response = router.clone().oneshot(post_request("/soundfile/read", wav)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], MSGPACK_CONTENT_TYPE);

        for uri in ["/soundfile/available/", "/soundfile/available/WAV"] {
            let request = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_hostile_sample_rate_is_422_and_server_survives() {
        let router = create_router(create_test_service(Config::default()));
        let data = Tensor::from_values(vec![800], &[0.1f64; 800]).unwrap();

        let body = crate::tensor::encode(&Signal { data: &data, fs: 1e30 }).unwrap();
        let response = router.clone().oneshot(post_request("/pyworld/all", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(read_error(response).await["kind"], "InvalidParameter");

        let mut nested = vec![0x91; 200_000];
        nested.push(0xc0);
        let response = router.clone().oneshot(post_request("/analysis/full", nested)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = Request::builder().method("GET").uri("/env").body(Body::empty()).unwrap();
        assert_eq!(router.oneshot(request).await.unwrap().status(), StatusCode::OK);
    }
}
