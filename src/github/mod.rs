//! GitHub REST client implementing the upstream search and detail contracts.

pub mod client;
pub mod json;
pub mod middleware;
pub mod models;

pub use client::GitHubApi;
