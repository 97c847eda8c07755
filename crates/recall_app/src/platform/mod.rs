mod app;
mod config;
mod host;
mod logging;
mod persistence;

pub use app::run_app;
