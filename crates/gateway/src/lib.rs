pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod executor;
pub mod state;
