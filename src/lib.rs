pub mod barrier;
pub mod cli;
pub mod client;
pub mod config;
pub mod distribution;
pub mod orchestrator;
pub mod reduce;
pub mod report;
pub mod retry;
pub mod util;
