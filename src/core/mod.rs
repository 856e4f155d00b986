pub mod cache;
pub mod decision;
pub mod engine;
pub mod enumerator;
pub mod gateway;
pub mod staging;
pub mod state_store;

pub use cache::{CacheEntry, DecisionCache, KvDecisionCache};
pub use decision::{SyncDecision, UploadDecider};
pub use engine::{SyncConfig, SyncEngine, SyncReport};
pub use enumerator::SourceEnumerator;
pub use gateway::DestinationGateway;
pub use staging::StagingDir;
pub use state_store::SqliteDecisionCache;
