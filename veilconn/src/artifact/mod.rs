mod pollution;
mod writer;

pub use pollution::*;
pub use writer::*;
