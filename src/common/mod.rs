pub mod backoff;
pub mod errors;
pub mod logger;
pub mod types;

pub use backoff::*;
pub use errors::*;
pub use logger::*;
pub use types::*;
