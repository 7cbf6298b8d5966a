use std::convert::Infallible;
use std::sync::Arc;

use warp::http::StatusCode;
use warp::Filter;

use crate::collab::CollabHub;
use crate::judge::{JudgeClient, JudgeRequest};
use crate::signal::RoomRegistry;
use super::collab_websocket::{self, CollabQuery};
use super::signal_websocket;

/// WebSocket route for room membership and signaling relay.
pub fn signal_route(
    registry: Arc<RoomRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("signal")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_registry(registry))
        .map(|ws: warp::ws::Ws, registry: Arc<RoomRegistry>| {
            ws.on_upgrade(move |websocket| {
                signal_websocket::handle_signal_websocket(websocket, registry)
            })
        })
}

/// WebSocket route for shared code and whiteboard sessions, scoped by
/// query parameters.
pub fn collab_route(
    hub: Arc<CollabHub>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("collab")
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::query::<CollabQuery>())
        .and(with_hub(hub))
        .map(|ws: warp::ws::Ws, query: CollabQuery, hub: Arc<CollabHub>| {
            ws.on_upgrade(move |websocket| {
                collab_websocket::handle_collab_websocket(websocket, hub, query)
            })
        })
}

pub fn health_route() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "healthy",
            "service": "Interview RTC Server",
            "version": env!("CARGO_PKG_VERSION")
        }))
    })
}

pub fn config_route() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("config").and(warp::get()).map(|| {
        use std::env;

        let config = serde_json::json!({
            "SIGNAL_WEBSOCKET_URL": env::var("SIGNAL_WEBSOCKET_URL").ok(),
            "COLLAB_WEBSOCKET_URL": env::var("COLLAB_WEBSOCKET_URL").ok(),
            "STUN_SERVER_URL": env::var("STUN_SERVER_URL").ok(),
            "JUDGE_URL": env::var("JUDGE_URL").ok()
        });

        warp::reply::json(&config)
    })
}

/// POST endpoint forwarding code-execution requests to the judge backend.
pub fn execute_route(
    judge: Arc<Option<JudgeClient>>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("collab" / "execute")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_judge(judge))
        .and_then(handle_execute)
}

async fn handle_execute(
    request: JudgeRequest,
    judge: Arc<Option<JudgeClient>>,
) -> Result<impl warp::Reply, Infallible> {
    let Some(judge) = judge.as_ref() else {
        return Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({
                "success": false,
                "stdout": "",
                "stderr": "code execution judge is not configured"
            })),
            StatusCode::SERVICE_UNAVAILABLE,
        ));
    };

    match judge.execute(&request).await {
        Ok(verdict) => Ok(warp::reply::with_status(
            warp::reply::json(&verdict),
            StatusCode::OK,
        )),
        Err(e) => {
            tracing::error!(error = %e, "Judge execution failed");
            Ok(warp::reply::with_status(
                warp::reply::json(&serde_json::json!({
                    "success": false,
                    "stdout": "",
                    "stderr": e.to_string()
                })),
                StatusCode::BAD_GATEWAY,
            ))
        }
    }
}

fn with_registry(
    registry: Arc<RoomRegistry>,
) -> impl Filter<Extract = (Arc<RoomRegistry>,), Error = Infallible> + Clone {
    warp::any().map(move || registry.clone())
}

fn with_hub(
    hub: Arc<CollabHub>,
) -> impl Filter<Extract = (Arc<CollabHub>,), Error = Infallible> + Clone {
    warp::any().map(move || hub.clone())
}

fn with_judge(
    judge: Arc<Option<JudgeClient>>,
) -> impl Filter<Extract = (Arc<Option<JudgeClient>>,), Error = Infallible> + Clone {
    warp::any().map(move || judge.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_endpoint_reports_healthy() {
        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&health_route())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_execute_without_judge_is_unavailable() {
        let route = execute_route(Arc::new(None));
        let response = warp::test::request()
            .method("POST")
            .path("/collab/execute")
            .json(&serde_json::json!({
                "code": "print(1)",
                "language": "python",
                "input": ""
            }))
            .reply(&route)
            .await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_signal_route_rejects_plain_get() {
        let registry = RoomRegistry::new();
        let response = warp::test::request()
            .method("GET")
            .path("/signal")
            .reply(&signal_route(registry))
            .await;

        assert_ne!(response.status(), StatusCode::OK);
    }
}
