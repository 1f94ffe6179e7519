pub mod ai;
pub mod anthropic;
pub mod api;
pub mod cli;
pub mod core;
