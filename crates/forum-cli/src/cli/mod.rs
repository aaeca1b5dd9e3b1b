pub mod commands;
pub mod config;
pub mod protocol;
pub mod session_file;

pub use commands::{execute, restore_session};
pub use config::CliConfig;
pub use protocol::{CliCommand, ErrorInfo};
pub use session_file::SessionFile;
