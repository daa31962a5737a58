pub mod admin_auth;
pub mod rate_limit;
pub mod request_id;

pub use admin_auth::AdminAuth;
pub use rate_limit::{
    api_key_from_headers, click_over_limit, click_rate_limiter, postback_rate_limiter,
};
pub use request_id::{RequestId, RequestIdMiddleware};
