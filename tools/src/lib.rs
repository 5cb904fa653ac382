//! Configuration of the block height probe, shared by the binary and the tests.
mod config;

#[cfg(test)]
mod tests;

pub use config::*;
