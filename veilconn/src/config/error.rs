use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File error: {0}")]
    File(#[from] FileError),
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),
    #[error("Internal error: {0}")]
    Internal(&'static str),
}

#[derive(Error, Debug)]
pub enum FileError {
    #[error("{0} io error: {1}")]
    Io(String, std::io::Error),
    #[error("{0} deserialization error: {1}")]
    Serde(String, serde_yaml::Error),
    #[error("Env variable error: {0}")]
    Env(#[from] std::env::VarError),
}

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Invalid rule: {0}")]
    InvalidRule(String),
    #[error("Invalid proxy type: {0}")]
    InvalidProxyType(String),
    #[error("Unknown rule set {ruleset} in group {group}")]
    UnknownRuleSet { ruleset: String, group: String },
    #[error("Duplicate group name: {0}")]
    DuplicateGroup(String),
}
