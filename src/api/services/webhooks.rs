//! Delivery history, dead letters and step tests (admin)

use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::api::response::api_result;
use crate::api::state::AppState;
use crate::storage::{ExecutionFilter, Page};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub pipeline_id: Option<String>,
    pub status: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StepTestBody {
    /// 覆盖默认示例数据
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

pub async fn list_executions(
    query: web::Query<ListQuery>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let query = query.into_inner();
    let filter = ExecutionFilter {
        pipeline_id: query.pipeline_id,
        status: query.status,
    };
    api_result(
        state
            .deliveries
            .list_executions(&filter, Page::new(query.page, query.page_size))
            .await,
    )
}

pub async fn get_execution(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    api_result(state.deliveries.get_execution(&path).await)
}

pub async fn list_dlq(query: web::Query<ListQuery>, state: web::Data<AppState>) -> HttpResponse {
    let query = query.into_inner();
    api_result(
        state
            .deliveries
            .list_dlq(
                query.pipeline_id.as_deref(),
                Page::new(query.page, query.page_size),
            )
            .await,
    )
}

pub async fn get_dlq(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    api_result(state.deliveries.get_dlq(&path).await)
}

pub async fn replay_dlq(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    api_result(state.deliveries.replay_dlq(&path).await)
}

pub async fn delete_dlq(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    api_result(
        state
            .deliveries
            .delete_dlq(&path)
            .await
            .map(|_| serde_json::json!({ "deleted": true })),
    )
}

pub async fn test_step(
    path: web::Path<String>,
    body: Option<web::Json<StepTestBody>>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let data = body.and_then(|b| b.into_inner().data);
    api_result(state.deliveries.test_step(&path, data).await)
}
