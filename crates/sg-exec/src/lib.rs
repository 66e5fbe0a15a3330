pub mod batch;
pub mod circuit;
pub mod config;
pub mod manager;
pub mod policy;
pub mod resilience;
pub mod shard_set;
pub mod step;

pub use batch::{Batch, DatabaseBatch, ShardBatch, ShardSetBatch};
pub use circuit::{CircuitBreaker, CircuitState, Permit};
pub use config::{
    CredentialConfig, DataConfig, DataServices, EndpointConfig, ShardConfig, ShardSetConfig,
};
pub use manager::ConnectionManager;
pub use policy::ResiliencePolicy;
pub use resilience::{BackoffShape, ResilienceConfig, ResilienceSection};
pub use shard_set::{Access, ShardId, ShardInstance, ShardSet};
pub use step::{
    BatchStep, ChildColumns, CommandStep, GrandchildColumns, KeyColumns, KeyListStep, KeyStep,
    ModelStep, RecordColumns, ScalarStep, StepContext,
};
