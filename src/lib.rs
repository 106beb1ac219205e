pub mod adventure;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod render;
pub mod session;
pub mod store;
