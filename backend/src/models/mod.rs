pub mod config;
pub mod enhance;
pub mod error;
pub mod image_buffer;
