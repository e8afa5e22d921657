//! Component E: the coordinator's REST surface. A thin `axum` adapter
//! over the resource tree of §6 -- every handler is a direct
//! pass-through into `business.rs` with no validation beyond what D
//! itself enforces. `axum` is the one dependency swap this workspace
//! makes past a JSON-RPC-shaped HTTP stack (DESIGN.md records why).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use qot_common::entities::{Node, Server, ServerType, Timeline, TimelineServer};
use qot_common::error::QotError;

use crate::business::Business;

pub fn router(business: Arc<Business>) -> Router {
    let service = Router::new()
        .route("/timelines/", get(list_timelines).post(create_timeline))
        .route(
            "/timelines/:name",
            get(get_timeline).put(put_timeline).delete(delete_timeline),
        )
        .route("/timelines/:name/qot", get(get_timeline_qot))
        .route(
            "/timelines/:name/nodes",
            get(list_nodes).post(create_node),
        )
        .route(
            "/timelines/:name/nodes/:node",
            get(get_node).put(put_node).delete(delete_node),
        )
        .route(
            "/timelines/:name/servers",
            get(list_timeline_servers).post(create_timeline_server),
        )
        .route(
            "/timelines/:name/servers/:server",
            get(get_timeline_server).delete(delete_timeline_server),
        )
        .route("/servers/", get(list_servers).post(create_server))
        .route("/servers/:server", get(get_server).delete(delete_server))
        .with_state(business);

    Router::new().nest("/api/service", service)
}

fn qot_error_status(e: &QotError) -> StatusCode {
    match e {
        QotError::NotFound(_) => StatusCode::NOT_FOUND,
        QotError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        QotError::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Collapses every `QotError` into the status codes of §6: 404 for a
/// missing entity, 500 for anything D didn't already turn into a 4xx.
struct ApiError(QotError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = qot_error_status(&self.0);
        (status, self.0.to_string()).into_response()
    }
}

impl From<QotError> for ApiError {
    fn from(e: QotError) -> Self {
        ApiError(e)
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn list_timelines(State(business): State<Arc<Business>>) -> Json<Vec<Timeline>> {
    Json(business.list_timelines())
}

#[derive(Deserialize)]
struct CreateTimelineRequest {
    name: String,
    id: Option<i64>,
}

async fn create_timeline(
    State(business): State<Arc<Business>>,
    Json(req): Json<CreateTimelineRequest>,
) -> ApiResult<(StatusCode, Json<Timeline>)> {
    let timeline = business.create_timeline(&req.name, req.id)?;
    Ok((StatusCode::CREATED, Json(timeline)))
}

async fn get_timeline(
    State(business): State<Arc<Business>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Timeline>> {
    Ok(Json(business.get_timeline(&name)?))
}

#[derive(Deserialize)]
struct PutTimelineRequest {
    meta: String,
}

async fn put_timeline(
    State(business): State<Arc<Business>>,
    Path(name): Path<String>,
    Json(req): Json<PutTimelineRequest>,
) -> ApiResult<StatusCode> {
    business.set_timeline_meta(&name, req.meta)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_timeline(
    State(business): State<Arc<Business>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    business.delete_timeline(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct QotView {
    accuracy_ns: u64,
    resolution_ns: u64,
}

async fn get_timeline_qot(
    State(business): State<Arc<Business>>,
    Path(name): Path<String>,
) -> ApiResult<Json<QotView>> {
    let t = business.get_timeline(&name)?;
    Ok(Json(QotView {
        accuracy_ns: t.accuracy_ns,
        resolution_ns: t.resolution_ns,
    }))
}

async fn list_nodes(
    State(business): State<Arc<Business>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<Node>>> {
    Ok(Json(business.list_nodes(&name)?))
}

#[derive(Deserialize)]
struct CreateNodeRequest {
    name: String,
    accuracy_ns: u64,
    resolution_ns: u64,
    ip: String,
}

async fn create_node(
    State(business): State<Arc<Business>>,
    Path(timeline): Path<String>,
    Json(req): Json<CreateNodeRequest>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    let node = business.create_node(&timeline, &req.name, req.accuracy_ns, req.resolution_ns, &req.ip)?;
    Ok((StatusCode::CREATED, Json(node)))
}

async fn get_node(
    State(business): State<Arc<Business>>,
    Path((timeline, node)): Path<(String, String)>,
) -> ApiResult<Json<Node>> {
    Ok(Json(business.get_node(&timeline, &node)?))
}

#[derive(Deserialize)]
struct PutNodeRequest {
    accuracy_ns: u64,
    resolution_ns: u64,
}

async fn put_node(
    State(business): State<Arc<Business>>,
    Path((timeline, node)): Path<(String, String)>,
    Json(req): Json<PutNodeRequest>,
) -> ApiResult<StatusCode> {
    business.update_node_qot(&timeline, &node, req.accuracy_ns, req.resolution_ns)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_node(
    State(business): State<Arc<Business>>,
    Path((timeline, node)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    business.delete_node(&timeline, &node)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_timeline_servers(
    State(business): State<Arc<Business>>,
    Path(timeline): Path<String>,
) -> Json<Vec<TimelineServer>> {
    Json(business.list_timeline_servers(&timeline))
}

#[derive(Deserialize)]
struct CreateTimelineServerRequest {
    name: String,
    stratum: i32,
    server_type: ServerType,
}

async fn create_timeline_server(
    State(business): State<Arc<Business>>,
    Path(timeline): Path<String>,
    Json(req): Json<CreateTimelineServerRequest>,
) -> ApiResult<(StatusCode, Json<TimelineServer>)> {
    let ts = business.register_timeline_server(&timeline, &req.name, req.stratum, req.server_type)?;
    Ok((StatusCode::CREATED, Json(ts)))
}

async fn get_timeline_server(
    State(business): State<Arc<Business>>,
    Path((timeline, server)): Path<(String, String)>,
) -> ApiResult<Json<TimelineServer>> {
    Ok(Json(business.get_timeline_server(&timeline, &server)?))
}

async fn delete_timeline_server(
    State(business): State<Arc<Business>>,
    Path((timeline, server)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    business.delete_timeline_server(&timeline, &server)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_servers(State(business): State<Arc<Business>>) -> Json<Vec<Server>> {
    Json(business.list_servers())
}

#[derive(Deserialize)]
struct CreateServerRequest {
    name: String,
    stratum: i32,
    server_type: ServerType,
}

async fn create_server(
    State(business): State<Arc<Business>>,
    Json(req): Json<CreateServerRequest>,
) -> ApiResult<(StatusCode, Json<Server>)> {
    let server = business.register_server(&req.name, req.stratum, req.server_type)?;
    Ok((StatusCode::CREATED, Json(server)))
}

async fn get_server(
    State(business): State<Arc<Business>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Server>> {
    Ok(Json(business.get_server(&name)?))
}

async fn delete_server(
    State(business): State<Arc<Business>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    business.delete_server(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use qot_common::coordination_store::InMemoryCoordinationStore;
    use qot_common::pubsub::InMemoryPubSub;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let store = Arc::new(crate::state_store::StateStore::new());
        let coord = InMemoryCoordinationStore::new("test");
        let bus = InMemoryPubSub::new();
        let business = Business::new(store, coord, bus);
        business.force_leader_for_test();
        router(Arc::new(business))
    }

    #[tokio::test]
    async fn s1_single_node_bind_through_rest() {
        let app = test_app();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/service/timelines/")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"t1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/service/timelines/t1/nodes")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"name":"n1","accuracy_ns":1000,"resolution_ns":100,"ip":"10.0.0.1"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/service/timelines/t1/qot")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn s4_full_drain_returns_404() {
        let app = test_app();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/service/timelines/")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"t1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/service/timelines/t1/nodes")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"name":"n1","accuracy_ns":1000,"resolution_ns":100,"ip":"10.0.0.1"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/service/timelines/t1/nodes/n1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/service/timelines/t1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
