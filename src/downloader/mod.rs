pub mod assembler;
pub mod http_pool;
pub mod manager;
pub mod manifest;
pub mod resume;
pub mod segment;
pub mod status;
pub mod task;
pub mod variant;

#[cfg(test)]
pub(crate) mod testing;

pub use manager::EpisodeQueue;
pub use status::{RunStatus, StatusEvent, StatusSink};
pub use task::{EpisodeRunner, EpisodeTask};
