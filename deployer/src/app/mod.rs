//! Application layer: options, deploy orchestration, status

pub mod options;
pub mod run;
pub mod status;
