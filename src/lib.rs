#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod comments;
pub mod config;
pub mod controller;
pub mod data;
pub mod feed;
pub mod logging;
pub mod notifications;
pub mod pagination;
pub mod playback;
pub mod player;
pub mod session;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
