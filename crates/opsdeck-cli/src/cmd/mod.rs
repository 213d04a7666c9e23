pub mod config;
pub mod dashboard;
pub mod kb;
pub mod monitor;
pub mod notify;
pub mod scan;
