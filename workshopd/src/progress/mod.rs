mod engine;
mod state;

pub use engine::{DEFAULT_MIN_UPLOAD_INTERVAL, FlushOutcome, ProgressError, ProgressSync};
pub use state::{Mutation, ProgressState};
