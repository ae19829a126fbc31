pub mod cli;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod execution;
pub mod health;
pub mod logging;
pub mod math;
pub mod metrics;
pub mod monitor;
pub mod persistence;
pub mod pipeline;
pub mod portfolio;
pub mod risk;
pub mod sandbox;
pub mod strategy;
pub mod types;
