pub mod endpoint;
pub mod entry;

pub use endpoint::*;
pub use entry::*;
