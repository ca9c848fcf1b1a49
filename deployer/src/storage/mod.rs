//! Persistent deploy state

pub mod layout;
pub mod lock;
pub mod tags;
