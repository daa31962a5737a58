//! afftrack - affiliate click tracking, postback attribution and webhook delivery
//!
//! # Features
//! - **server**: HTTP server mode (default)
//! - **cli**: Command-line interface (default)
//!
//! # Architecture
//! - `cache`: Reservation stores (moka / Redis) for replay and dedup checks
//! - `storage`: sea-orm backend and data models
//! - `services`: Link signing, click recording, attribution, webhook pipeline
//! - `api`: HTTP handlers and middleware
//! - `config`: Configuration management
//! - `runtime`: Application lifecycle and execution modes
//! - `system`: Logging

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod runtime;
pub mod services;
pub mod storage;
pub mod system;
pub mod utils;
