pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod kpi;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod promote;
pub mod registry;
pub mod snapshot;
pub mod trainer;
pub mod tune;
pub mod version;

pub use config::AppConfig;
pub use dataset::Dataset;
pub use error::{RecastError, Result};
pub use kpi::{KpiStatus, KpiThresholds};
pub use metrics::{CvMetrics, MetricSet};
pub use model::{Hyperparameters, ModelBackend, ModelType};
pub use pipeline::{CycleReport, UpdateCycle, VersionOutcome, VersionResult};
pub use promote::{PromotionDecision, PromotionOutcome, PromotionPolicy};
pub use registry::{FsRegistry, InMemoryRegistry, RunRecord, RunRegistry};
pub use snapshot::{ChangeSet, DataSnapshot, DataState, StateStore};
pub use trainer::{TrainRequest, Trainer, TrainingRun};
pub use tune::{TuneOutcome, Tuner};
