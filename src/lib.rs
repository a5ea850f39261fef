pub mod cli;
pub mod commands;
pub mod compose;
pub mod config;
pub mod identity;
pub mod orchestrator;
pub mod platform;
pub mod ui;
