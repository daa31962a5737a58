//! Admin bearer-token middleware
//!
//! - token 为空：管理接口整体关闭，返回 404
//! - `Authorization: Bearer <token>` 常量时间比较

use actix_service::{Service, Transform};
use actix_web::{
    Error, HttpResponse,
    body::EitherBody,
    dev::{ServiceRequest, ServiceResponse},
    http::{StatusCode, header::CONTENT_TYPE},
};
use futures_util::future::{LocalBoxFuture, Ready, ready};
use std::rc::Rc;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, info, trace};

use crate::api::response::error_response;

#[derive(Clone)]
pub struct AdminAuth {
    token: Arc<str>,
}

impl AdminAuth {
    pub fn new(token: &str) -> Self {
        Self {
            token: Arc::from(token),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AdminAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AdminAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdminAuthMiddleware {
            service: Rc::new(service),
            token: self.token.clone(),
        }))
    }
}

pub struct AdminAuthMiddleware<S> {
    service: Rc<S>,
    token: Arc<str>,
}

impl<S> AdminAuthMiddleware<S> {
    fn extract_bearer_token(req: &ServiceRequest) -> Option<&str> {
        req.headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(str::trim)
    }

    fn token_matches(expected: &str, provided: &str) -> bool {
        expected.as_bytes().ct_eq(provided.as_bytes()).into()
    }
}

impl<S, B> Service<ServiceRequest> for AdminAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv = self.service.clone();
        let token = self.token.clone();

        Box::pin(async move {
            if token.is_empty() {
                debug!("Admin token not configured - returning 404");
                return Ok(req.into_response(
                    HttpResponse::NotFound()
                        .insert_header((CONTENT_TYPE, "text/plain; charset=utf-8"))
                        .body("Not Found")
                        .map_into_right_body(),
                ));
            }

            let authorized = Self::extract_bearer_token(&req)
                .is_some_and(|provided| Self::token_matches(&token, provided));
            if !authorized {
                info!("Admin authentication failed for {}", req.path());
                return Ok(req.into_response(
                    error_response(
                        StatusCode::UNAUTHORIZED,
                        "UNAUTHORIZED",
                        "invalid or missing admin token",
                    )
                    .map_into_right_body(),
                ));
            }

            trace!("Admin request authorized");
            Ok(srv.call(req).await?.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test, web};

    async fn ok() -> HttpResponse {
        HttpResponse::Ok().body("secret stuff")
    }

    #[actix_rt::test]
    async fn requires_matching_bearer_token() {
        let app = test::init_service(
            App::new().service(
                web::scope("/admin")
                    .wrap(AdminAuth::new("s3cret"))
                    .route("/x", web::get().to(ok)),
            ),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/admin/x").to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/admin/x")
                .insert_header(("Authorization", "Bearer wrong"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/admin/x")
                .insert_header(("Authorization", "Bearer s3cret"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_rt::test]
    async fn empty_token_disables_admin_api() {
        let app = test::init_service(
            App::new().service(
                web::scope("/admin")
                    .wrap(AdminAuth::new(""))
                    .route("/x", web::get().to(ok)),
            ),
        )
        .await;
        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/admin/x")
                .insert_header(("Authorization", "Bearer "))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
