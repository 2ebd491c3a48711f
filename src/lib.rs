pub mod domain;
pub mod error;
pub mod harness;
pub mod infra;
pub mod report;
