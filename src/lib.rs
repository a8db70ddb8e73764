mod annotation;
mod camera;
mod detection;
mod files;
mod proxy;
mod range;
mod registry;
mod routes;
mod server;
mod stream;
mod telemetry;

pub mod app;
pub mod cli;
pub mod config;

pub use app::start_app;
