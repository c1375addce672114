//! Idempotency-Key handling for mutating endpoints

use crate::errors::ApiError;
use actix_web::{
    error::ResponseError,
    http::{header, StatusCode},
    HttpRequest, HttpResponse,
};
use ledger_core::idempotency::{
    fingerprint, validate_key, CachedResponse, Clock, Execution, IdempotencyCache,
    IDEMPOTENCY_KEY_HEADER,
};
use serde::Serialize;
use std::future::Future;

/// Set on responses served from the cache
pub const REPLAYED_HEADER: &str = "Idempotent-Replayed";

const JSON_CONTENT_TYPE: &str = "application/json";

/// A handler's successful outcome before it becomes an HTTP response
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self, ApiError> {
        Ok(Self {
            status,
            body: serde_json::to_vec(value)?,
        })
    }

    pub fn into_response(self) -> HttpResponse {
        HttpResponse::build(self.status)
            .content_type(JSON_CONTENT_TYPE)
            .body(self.body)
    }

    fn into_cached(self) -> CachedResponse {
        CachedResponse::new(self.status.as_u16(), json_headers(), self.body)
    }
}

fn json_headers() -> Vec<(String, String)> {
    vec![(header::CONTENT_TYPE.as_str().to_string(), JSON_CONTENT_TYPE.to_string())]
}

fn error_to_cached(err: &ApiError) -> CachedResponse {
    err.log();
    let body = serde_json::to_vec(&err.body()).unwrap_or_default();
    CachedResponse::new(err.status_code().as_u16(), json_headers(), body)
}

/// Extract the key from request headers; absent is fine, malformed is not
pub fn extract_idempotency_key(req: &HttpRequest) -> Result<Option<String>, ApiError> {
    let Some(value) = req.headers().get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };

    let key = value.to_str().map_err(|_| {
        ApiError::InvalidInput("Idempotency-Key must be visible ASCII".to_string())
    })?;
    validate_key(key)?;

    Ok(Some(key.to_string()))
}

fn to_http(execution: Execution) -> HttpResponse {
    let response = execution.response;
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut builder = HttpResponse::build(status);
    for (name, value) in &response.headers {
        builder.insert_header((name.as_str(), value.as_str()));
    }
    if execution.replayed {
        builder.insert_header((REPLAYED_HEADER, "true"));
    }
    builder.body(response.body)
}

/// Run `handler` at most once per (method, path, body, key).
///
/// Without a key the handler simply runs. With one, the first 2xx response
/// is cached and replayed for retries; failures are returned but not kept.
pub async fn idempotent<C, F, Fut>(
    cache: &IdempotencyCache<C>,
    req: &HttpRequest,
    body: &[u8],
    handler: F,
) -> Result<HttpResponse, ApiError>
where
    C: Clock,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Reply, ApiError>>,
{
    let Some(key) = extract_idempotency_key(req)? else {
        return Ok(handler().await?.into_response());
    };

    let fp = fingerprint(req.method().as_str(), req.path(), body, &key);
    let execution = cache
        .execute(&fp, || async move {
            match handler().await {
                Ok(reply) => reply.into_cached(),
                Err(err) => error_to_cached(&err),
            }
        })
        .await;

    Ok(to_http(execution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{body::to_bytes, test::TestRequest};
    use ledger_core::IdempotencyConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_handler(
        calls: &Arc<AtomicUsize>,
    ) -> impl FnOnce() -> std::future::Ready<Result<Reply, ApiError>> {
        let calls = Arc::clone(calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Reply::json(StatusCode::OK, &serde_json::json!({ "call": n })))
        }
    }

    #[actix_web::test]
    async fn test_no_key_always_runs() {
        let cache = IdempotencyCache::new(IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let req = TestRequest::post().uri("/x").to_http_request();

        idempotent(&cache, &req, b"{}", counting_handler(&calls)).await.unwrap();
        idempotent(&cache, &req, b"{}", counting_handler(&calls)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[actix_web::test]
    async fn test_replay_with_key() {
        let cache = IdempotencyCache::new(IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let req = TestRequest::post()
            .uri("/x")
            .insert_header((IDEMPOTENCY_KEY_HEADER, "abc-123"))
            .to_http_request();

        let first = idempotent(&cache, &req, b"{}", counting_handler(&calls)).await.unwrap();
        assert!(first.headers().get(REPLAYED_HEADER).is_none());
        let first_body = to_bytes(first.into_body()).await.unwrap();

        let second = idempotent(&cache, &req, b"{}", counting_handler(&calls)).await.unwrap();
        assert_eq!(second.headers().get(REPLAYED_HEADER).unwrap(), "true");
        assert_eq!(
            second.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let second_body = to_bytes(second.into_body()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first_body, second_body);
    }

    #[actix_web::test]
    async fn test_errors_are_not_cached() {
        let cache = IdempotencyCache::new(IdempotencyConfig::default());
        let req = TestRequest::post()
            .uri("/x")
            .insert_header((IDEMPOTENCY_KEY_HEADER, "k"))
            .to_http_request();

        let response = idempotent(&cache, &req, b"", || async {
            Err::<Reply, _>(ApiError::InvalidInput("nope".to_string()))
        })
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(cache.is_empty());
    }

    #[actix_web::test]
    async fn test_empty_key_rejected() {
        let req = TestRequest::post()
            .uri("/x")
            .insert_header((IDEMPOTENCY_KEY_HEADER, ""))
            .to_http_request();
        let err = extract_idempotency_key(&req).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
