mod backend;
mod diffusion;
mod pool;
mod types;

pub use backend::{HttpDiffusionBackend, ImageBackend, RenderRequest};
pub use diffusion::{DiffusionWorker, DiffusionWorkerFactory, GenerationPreset};
pub use pool::{PoolStatus, StartGate, WorkerLease, WorkerPool};
pub use types::{GenerationResult, GenerationTask, StorageStatus, Worker, WorkerFactory};
