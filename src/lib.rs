//! Tollgate - HTTP request-rate governor
//!
//! This crate limits inbound HTTP requests per client identity. Anonymous
//! clients are keyed by source address, clients presenting an `API_KEY`
//! header by that key, each with its own per-second quota. A client that
//! exceeds its quota is blocked for a configured duration. All counters
//! live in an external counter store (Redis or an in-process map).

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
