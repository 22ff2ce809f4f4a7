pub mod coordinator;
pub mod events;
pub mod orchestrator;
pub mod retry;
pub mod survey;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;
pub mod types;

pub use coordinator::SyncCoordinator;
pub use events::{SyncEvent, SyncEvents};
pub use orchestrator::SyncOrchestrator;
pub use survey::{SurveyClient, SurveyPayload};
pub use transport::{BatchTransport, HttpBatchTransport};
pub use types::{BatchError, BatchOutcome, Connectivity, SyncReport, TransportError};
