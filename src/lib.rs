//! Affilink - affiliate conversion attribution and entitlement gateway
//!
//! This library turns untrusted, at-least-once webhook traffic from partner
//! networks into idempotent premium-entitlement decisions, with geo-based
//! link cloaking and a manual verification fallback.
//!
//! # Architecture
//! - `adapters`: one postback parser per partner protocol
//! - `storages`: attribution store trait + memory/file backends
//! - `services`: HTTP services (geo, click, postback, policy, sync,
//!   verification, proxy, admin, health)
//! - `middleware`: admin shared-secret auth
//! - `config`: environment-driven configuration
//! - `system`: logging initialization

pub mod adapters;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod services;
pub mod storages;
pub mod system;
pub mod utils;
