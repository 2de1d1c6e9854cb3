pub mod bootstrap;
pub mod build;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod io;
pub mod notify;
pub mod paths;
pub mod process;
pub mod server;
pub mod session;
pub mod state;
pub mod venv;

pub use error::{DocenvError, Result};
