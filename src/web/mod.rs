//! Web server exposing the voting and membership API.

mod admin;
mod auth;
mod server;

pub use server::{start_web_server, AppState};
