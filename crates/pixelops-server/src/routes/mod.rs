pub mod analytics;
pub mod diagnostics;
pub mod events;
pub mod health;
