//! Guess production: client labels, reward records, table rows, the
//! classifier and feedback seams, and the batch computer that ties them
//! together.

pub mod batch;
pub mod classifier;
pub mod client;
pub mod computer;
pub mod feedback;
pub mod record;
pub mod row;

pub use batch::BatchSizer;
pub use classifier::{ClassificationError, Classifier, HttpClassifier};
pub use client::{ConsensusClient, ProbabilityMap};
pub use computer::{BatchGuessComputer, ComputerOptions};
pub use feedback::{graffiti_client, TrainingDirFeedback, TrainingFeedback};
pub use record::{RewardRecord, Slot};
pub use row::{Guess, GuessRow};
