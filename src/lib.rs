pub mod app;
pub mod cli;
pub mod config;
pub mod github;
pub mod logging;
pub mod lookup;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
pub mod web;
