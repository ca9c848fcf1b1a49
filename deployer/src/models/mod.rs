//! Data models

pub mod container;
pub mod service;
