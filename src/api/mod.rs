//! HTTP surface: click redirect, postback intake, admin operations

pub mod middleware;
pub mod response;
pub mod services;
pub mod state;

pub use state::AppState;
