//! Operator entry points: configuration loading and the controller behind the `courier`
//! subcommands.

pub mod controller;

pub use controller::{Controller, Courier, SHUTDOWN_BROADCAST, find_config_file};
