//! Batch Processing
//!
//! Batch jobs read their input in slices from a [`BatchSource`] and run
//! inference per item. Jobs execute one at a time in submission order.

pub mod events;
pub mod processor;
pub mod source;

pub use events::BatchEvent;
pub use processor::{
    BatchJobConfig, BatchProcessor, BatchProcessorConfig, DEFAULT_BATCH_SIZE, DEFAULT_SLICE_YIELD,
};
pub use source::{BatchSource, GeneratedSource, InMemorySource};
