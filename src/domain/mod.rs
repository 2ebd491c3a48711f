pub mod config;
pub mod handle;
pub mod identity;
pub mod operation;
pub mod outcome;
pub mod permission;
pub mod reconciler;
pub mod storage;
pub mod yaml_config;
