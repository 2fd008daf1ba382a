//! Domain model (IDs, task types, enqueue options, outcomes, decisions).

pub mod decision;
pub mod ids;
pub mod options;
pub mod outcome;
pub mod task_type;

pub use decision::{Decider, Decision, DefaultDecider};
pub use ids::{ParseIdError, TaskId, WorkerId};
pub use options::{EnqueueOptions, ResolvedOptions, validate_queue_name};
pub use outcome::{Outcome, OutcomeKind};
pub use task_type::TaskType;
