mod error;
mod file_path;
mod group;
mod profile;

pub use error::*;
pub use file_path::*;
pub use group::*;
pub use profile::*;
