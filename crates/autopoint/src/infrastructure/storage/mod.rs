//! File-system persistence for application settings.

pub mod config;
