//! Wire behaviour of the reqwest transport against an in-process server.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value as JsonValue, json};
use strata_core::api::{ApiClient, HttpTransport, Params};
use strata_core::rate_limit::RateLimiterRegistry;
use strata_core::{StrataError, Value};

type Recorder = Arc<Mutex<Vec<JsonValue>>>;

const ROWS: [(&str, &str, f64); 3] = [
    ("000001.SZ", "20240102", 9.39),
    ("000002.SZ", "20240102", 7.10),
    ("000004.SZ", "20240102", 15.2),
];

async fn paged(State(seen): State<Recorder>, Json(body): Json<JsonValue>) -> Json<JsonValue> {
    seen.lock().unwrap().push(body.clone());
    let offset = body["params"]["offset"].as_u64().unwrap_or(0) as usize;
    let limit = body["params"]["limit"].as_u64().unwrap_or(100) as usize;
    let items: Vec<JsonValue> = ROWS
        .iter()
        .skip(offset)
        .take(limit)
        .map(|(code, date, close)| json!([code, date, close]))
        .collect();
    Json(json!({
        "code": 0,
        "msg": "",
        "data": {
            "fields": ["ts_code", "trade_date", "close"],
            "items": items,
            "has_more": false
        }
    }))
}

async fn unavailable() -> (StatusCode, &'static str) {
    (StatusCode::SERVICE_UNAVAILABLE, "maintenance window")
}

async fn refused() -> Json<JsonValue> {
    Json(json!({ "code": 40203, "msg": "rate limit exceeded", "data": null }))
}

async fn serve(app: Router) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

fn client(addr: SocketAddr) -> Result<ApiClient> {
    let transport = HttpTransport::new(
        format!("http://{addr}/"),
        "test-token",
        Duration::from_secs(5),
    )?;
    Ok(ApiClient::new(
        Arc::new(transport),
        Arc::new(RateLimiterRegistry::new(2)),
    ))
}

fn params() -> Params {
    let mut params = Params::new();
    params.insert("trade_date".into(), "20240102".into());
    params
}

#[tokio::test]
async fn pages_are_posted_as_json_and_assembled() -> Result<()> {
    let seen = Recorder::default();
    let addr = serve(Router::new().route("/", post(paged)).with_state(seen.clone())).await?;

    let fields = vec!["ts_code".to_string(), "close".to_string()];
    let set = client(addr)?.fetch("daily", &params(), &fields, 2).await?;

    assert_eq!(set.columns(), ["ts_code", "close"]);
    assert_eq!(set.len(), 3);
    assert_eq!(set.get(2, "ts_code"), Some(&Value::from("000004.SZ")));
    assert_eq!(set.get(0, "close"), Some(&Value::Float(9.39)));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0]["api_name"], "daily");
    assert_eq!(seen[0]["token"], "test-token");
    assert_eq!(seen[0]["fields"], "ts_code,close");
    assert_eq!(seen[0]["params"]["trade_date"], "20240102");
    assert_eq!(seen[0]["params"]["limit"], 2);
    assert_eq!(seen[0]["params"]["offset"], 0);
    assert_eq!(seen[1]["params"]["offset"], 2);
    Ok(())
}

#[tokio::test]
async fn non_200_status_is_api_error() -> Result<()> {
    let addr = serve(Router::new().route("/", post(unavailable))).await?;
    let err = client(addr)?
        .fetch("daily", &params(), &[], 100)
        .await
        .unwrap_err();
    match err {
        StrataError::Api {
            status_or_code,
            message,
        } => {
            assert_eq!(status_or_code, 503);
            assert_eq!(message, "maintenance window");
        }
        other => panic!("expected API error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn nonzero_payload_code_is_api_error() -> Result<()> {
    let addr = serve(Router::new().route("/", post(refused))).await?;
    let err = client(addr)?
        .fetch("daily", &params(), &[], 100)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StrataError::Api { status_or_code: 40203, ref message } if message == "rate limit exceeded"
    ));
    assert!(err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn gate_is_released_after_failure() -> Result<()> {
    let addr = serve(Router::new().route("/", post(unavailable))).await?;
    let client = client(addr)?;
    for _ in 0..3 {
        assert!(client.fetch("daily", &params(), &[], 10).await.is_err());
    }
    assert_eq!(client.limiter().available("daily"), Some(2));
    Ok(())
}
