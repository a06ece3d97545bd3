use crate::config::ConfigError;
use crate::external::{PreferenceError, TunnelError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("No valid tunnel registration could be obtained")]
    InvalidProvider,
    #[error("Tunnel start failed: {0}")]
    StartFailure(TunnelError),
    #[error("Registration error: {0}")]
    Registration(TunnelError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Preference error: {0}")]
    Preference(#[from] PreferenceError),
}
