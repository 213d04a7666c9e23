pub mod config;
pub mod dashboard;
pub mod error;
pub mod io;
pub mod knowledge;
pub mod monitor;
pub mod notify;
pub mod paths;
pub mod pidfile;
pub mod process;
pub mod runner;
pub mod scan;

pub use error::{OpsError, Result};
