//! Data models for amc-classifier

pub mod item;
pub mod outputs;
pub mod report;
pub mod stage;

pub use item::{AlbumInput, Item, StageFailure};
pub use outputs::{CanonicalRecord, EnrichmentOutput, ExtractionOutput, SampledTags, TriageOutput};
pub use report::{CacheHit, ItemReport, Outcome, RunCounters, RunReport};
pub use stage::{ResultSource, Stage, StageMeta, StagePayload, StageResult};
