pub mod console;
pub mod core;
pub mod engine;
pub mod http;
pub mod logging;
pub mod logos;
pub mod mpv;
pub mod session;
