//! Conversion status operations (admin)

use actix_web::{HttpResponse, web};
use serde::Deserialize;

use crate::api::response::api_result;
use crate::api::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RejectBody {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn get_conversion(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    api_result(state.attribution.get_conversion(&path).await)
}

pub async fn approve_conversion(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> HttpResponse {
    api_result(state.attribution.approve(&path).await)
}

pub async fn reject_conversion(
    path: web::Path<String>,
    body: Option<web::Json<RejectBody>>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let reason = body.and_then(|b| b.into_inner().reason);
    api_result(state.attribution.reject(&path, reason.as_deref()).await)
}

pub async fn pay_conversion(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    api_result(state.attribution.mark_paid(&path).await)
}
