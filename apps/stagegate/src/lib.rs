//! # Stagegate
//!
//! Server and CLI around `stagegate-core`. This crate is the only one that
//! reads the wall clock, the environment, or the network.

pub mod api;
pub mod cli;
pub mod config;
