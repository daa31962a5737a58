pub mod click;
pub mod conversions;
pub mod health;
pub mod postback;
pub mod webhooks;

use std::sync::Arc;

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::middleware::Condition;
use actix_web::{Error, Scope, web};

use crate::api::middleware::{AdminAuth, click_rate_limiter, postback_rate_limiter};
use crate::config::RateLimitConfig;

pub fn health_routes() -> Scope {
    web::scope("/health")
        .route("", web::get().to(health::health_check))
        .route("", web::head().to(health::health_check))
}

/// 超限的点击仍然跳转，只是不计数（见 `click::handle_click`）
pub fn click_routes(
    limits: RateLimitConfig,
    trusted_proxies: Arc<Vec<String>>,
) -> Scope<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
> {
    web::scope("/c")
        .wrap(Condition::new(
            limits.enabled,
            click_rate_limiter(limits.clicks_per_minute, trusted_proxies),
        ))
        .route("/{link}", web::get().to(click::handle_click))
        .route("/{link}", web::head().to(click::handle_click))
}

pub fn postback_routes(
    limits: RateLimitConfig,
    trusted_proxies: Arc<Vec<String>>,
) -> Scope<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
> {
    web::scope("/api/postback")
        .wrap(Condition::new(
            limits.enabled,
            postback_rate_limiter(limits.postbacks_per_minute, trusted_proxies),
        ))
        .route("", web::post().to(postback::handle_postback))
}

/// token 为空时所有管理接口返回 404
pub fn admin_routes(
    admin_token: String,
) -> Scope<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
> {
    web::scope("/api/admin")
        .wrap(AdminAuth::new(&admin_token))
        .service(
            web::scope("/conversions")
                .route("/{id}", web::get().to(conversions::get_conversion))
                .route("/{id}/approve", web::post().to(conversions::approve_conversion))
                .route("/{id}/reject", web::post().to(conversions::reject_conversion))
                .route("/{id}/pay", web::post().to(conversions::pay_conversion)),
        )
        .service(
            web::scope("/webhooks")
                .route("/executions", web::get().to(webhooks::list_executions))
                .route("/executions/{id}", web::get().to(webhooks::get_execution))
                .route("/dlq", web::get().to(webhooks::list_dlq))
                .route("/dlq/{id}", web::get().to(webhooks::get_dlq))
                .route("/dlq/{id}", web::delete().to(webhooks::delete_dlq))
                .route("/dlq/{id}/replay", web::post().to(webhooks::replay_dlq))
                .route("/steps/{id}/test", web::post().to(webhooks::test_step)),
        )
}
