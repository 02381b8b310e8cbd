pub mod assign;
pub mod config;
