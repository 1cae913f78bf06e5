pub mod analytics;
pub mod config;
pub mod delivery;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod pixel;
pub mod rules;
pub mod store;
