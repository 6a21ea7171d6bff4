pub mod archive;
pub mod catalog;
pub mod container;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod readiness;
pub mod registry;
pub mod workers;

pub use archive::{ArchiveError, ArchiveExtractor, ExtractSummary, TarGzExtractor};
pub use catalog::{BackupInfo, CatalogError, ServerCatalog, ServerInfo, ServerPaths, format_size};
pub use container::{ContainerControl, ContainerError, ContainerStatus};
pub use models::{JobSnapshot, RestoreJob, RestoreStep};
pub use orchestrator::{RestoreError, RestoreOrchestrator, RestoreSettings};
pub use progress::JobProgress;
pub use readiness::{Readiness, ReadinessProbe};
pub use registry::{RegistryError, RestoreRegistry, Subscription};
pub use workers::{RestoreWorkers, WorkerError};
