pub mod config;
pub mod logger;
pub mod password;
pub mod settings;
pub(crate) mod sokoni_toml;

pub use config::*;
pub use logger::setup_logging;
pub use password::read_smb_password;
pub use settings::Settings;
