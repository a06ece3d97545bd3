mod error;
#[allow(clippy::module_inception)]
mod manager;

pub use error::*;
pub use manager::*;
