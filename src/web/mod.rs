//! HTTP surface: the top-users route, health, and shared middleware.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod status;
pub mod top;

pub use routes::*;
