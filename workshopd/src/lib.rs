pub mod daemon;
pub mod progress;
pub mod sync;
