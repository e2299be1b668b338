pub mod mutation_outcome;
pub mod optimistic_update;
pub mod queue_stats;
pub mod queued_mutation;

pub use mutation_outcome::{MutationOutcome, OptimisticResult};
pub use optimistic_update::{MutationEffect, OptimisticUpdate};
pub use queue_stats::QueueStats;
pub use queued_mutation::{MutationDraft, QueuedMutation};
