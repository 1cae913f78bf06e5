pub mod app;
pub mod diagnostics;
pub mod error;
pub mod ingest;
pub mod insights;
pub mod pool;
pub mod processor;
pub mod retention;
pub mod rollup;
pub mod routes;
pub mod scheduler;
pub mod state;
