pub mod config;
pub mod correlator;
pub mod error;
pub mod events;
pub mod hub;
pub mod logger;
pub mod orchestrator;
pub mod runner;
pub mod sequence;
