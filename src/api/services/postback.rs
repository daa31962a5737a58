//! `POST /api/postback`

use actix_web::{HttpRequest, HttpResponse, ResponseError, web};
use tracing::{debug, info};

use crate::api::middleware::api_key_from_headers;
use crate::api::response::success_response;
use crate::api::state::AppState;
use crate::errors::AfftrackError;
use crate::services::PostbackRequest;

pub async fn handle_postback(
    req: HttpRequest,
    body: web::Json<PostbackRequest>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let postback = body.into_inner();

    // header 优先，body 中的 api_key 兜底
    let Some(raw_key) = api_key_from_headers(req.headers())
        .or_else(|| postback.api_key.clone().filter(|k| !k.is_empty()))
    else {
        return AfftrackError::invalid_api_key("missing API key").error_response();
    };

    let key = match state.api_keys.verify(&raw_key).await {
        Ok(key) => key,
        Err(e) => return e.error_response(),
    };

    match state.attribution.record_conversion(&key, &postback).await {
        Ok(receipt) => {
            if receipt.duplicate {
                debug!("Duplicate postback for conversion {}", receipt.conversion_id);
            } else {
                info!(
                    "Postback recorded conversion {} ({})",
                    receipt.conversion_id, receipt.attribution_status
                );
            }
            success_response(receipt)
        }
        Err(e) => e.error_response(),
    }
}
