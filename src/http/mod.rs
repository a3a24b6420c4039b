//! HTTP surface: session endpoints, gate rejections and the server.

pub mod rejection;
mod routes;
mod server;

pub use rejection::GateRejection;
pub use routes::{
    build_app, router, AppState, LoginRequest, ACCESS_TOKEN_HEADER, REFRESH_TOKEN_HEADER,
};
pub use server::HttpServer;
