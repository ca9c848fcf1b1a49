//! Deployment module

pub mod compose;
pub mod docker;
pub mod fsm;
pub mod gateway;
pub mod hosts;
pub mod registry;
pub mod resolver;
pub mod upgrade;
