pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod item;
pub mod manifest;
pub mod pipeline;
pub mod report;
pub mod spool;
pub mod status;
pub mod store;
pub mod transform;
pub mod util;
