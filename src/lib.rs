pub mod audio;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod media;
pub mod session;
pub mod state;
pub mod transport;
pub mod video;
pub mod websocket;
