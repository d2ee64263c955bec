mod backend;
mod dataset;
mod documents;
mod registry;

#[cfg(test)]
mod testing;

pub use backend::{BackendResolver, ResolvedBackend};
pub use dataset::{CreateDataset, DatasetOrchestrator, UpdateDataset};
pub use documents::{DocumentOrchestrator, RetrievalTest};
pub use registry::{AdapterRegistry, AdapterRegistryBuilder, RegistryStatus};
