pub mod catalog;
pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod report;
pub mod stage;
