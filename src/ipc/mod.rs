//! IPC module for UI communication

mod protocol;
mod server;

pub use server::Server;
