pub mod processor;
pub mod worker;

pub use processor::{IngestProcessor, ProcessOutcome};
pub use worker::Worker;
