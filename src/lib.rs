pub mod api;
pub mod commands;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod series;
pub mod utils;

pub use errors::{AppError, Result};
