pub mod mutation_facade;
pub mod queue_processor;

pub use mutation_facade::{MutationClient, MutationOptions, TableMutations};
pub use queue_processor::{PassReport, QueueProcessor, QueueProcessorConfig, WorkerHandle};
