//! Testing utilities

pub mod network_sim;

pub use network_sim::NetworkSimulator;
