//! Library crate for connect4-coord, exposing modules for the binary and integration tests.

pub mod config;
pub mod console;
pub mod coord;
pub mod error;
/// Protocol roles: namespace access, membership, election, turns and moves.
pub mod services;
pub mod state;
