pub mod base;
pub mod engine;
pub mod fleet;
pub mod logging;
pub mod server;
pub mod session;

pub use base::*;
pub use engine::*;
pub use fleet::*;
pub use logging::*;
pub use server::*;
pub use session::*;
