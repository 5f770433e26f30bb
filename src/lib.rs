pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod keys;
pub mod models;
pub mod notify;
pub mod playback;
pub mod session;
pub mod soundboard;
pub mod upload;
