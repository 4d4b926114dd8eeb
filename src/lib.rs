pub mod beacon;
pub mod guess;
pub mod runtime;
pub mod store;
pub mod sync;

pub use beacon::{BeaconClient, ChainDataSource, ChainError};
pub use guess::{
    BatchGuessComputer, ClassificationError, Classifier, ComputerOptions, ConsensusClient, Guess,
    GuessRow, HttpClassifier, ProbabilityMap, RewardRecord, Slot, TrainingDirFeedback,
    TrainingFeedback,
};
pub use runtime::config::{SyncConfig, SyncConfigBuilder, SyncConfigParams};
pub use runtime::progress::SyncCheckpoint;
pub use runtime::runner::{lookup_slot, Runner};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use store::{
    open_guess_store, ClickHouseGuessStore, GuessStore, PostgresGuessStore, StoreBackend,
    StoreError,
};
pub use sync::{EngineOptions, StepFlow, SyncEngine, SyncState};
