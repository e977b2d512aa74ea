pub mod config;
pub mod engine;
pub mod error;
pub mod game;
pub mod messages;
pub mod position;
pub mod rules;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
