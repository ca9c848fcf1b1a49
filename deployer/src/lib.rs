//! flow-deploy library
//!
//! Zero-downtime rolling deploys for Docker Compose services.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod progress;
pub mod storage;
pub mod utils;
