pub mod chunk_plan;
pub mod cli;
pub mod config;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod job;
pub mod merge;
pub mod pipeline;
pub mod pool;
pub mod probe;
pub mod progress;
pub mod report;
pub mod retry;
pub mod store;
pub mod util;
