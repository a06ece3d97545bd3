mod control;
mod logger;
mod preference;
mod provision;
mod tunnel;

pub use control::*;
pub use logger::*;
pub use preference::*;
pub use provision::*;
pub use tunnel::*;
