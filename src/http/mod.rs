//! HTTP surface: the rate limited listener and the admin listener.

mod admin;
mod gate;
mod server;

pub use admin::admin_router;
pub use gate::{
    accept_request, gated, rate_limit_gate, GateState, API_KEY_HEADER, INTERNAL_ERROR_MESSAGE,
    RATE_LIMITED_MESSAGE, UNKNOWN_SOURCE,
};
pub use server::HttpServer;
