pub mod batch;
pub mod cli;
pub mod config;
pub mod state;
pub mod status;
pub mod tail;
pub mod watcher;
pub mod web;
