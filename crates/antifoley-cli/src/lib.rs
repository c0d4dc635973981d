//! Command line and HTTP front end for the antifoley detector.

pub mod config;
pub mod server;
