pub mod chat;
pub mod common;
pub mod configs;
pub mod engine;
pub mod gateway;
pub mod interop;
pub mod manager;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod store;
pub mod transport;
