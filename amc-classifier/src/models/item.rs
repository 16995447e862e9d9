//! Work items and the stage state machine

use super::outputs::{CanonicalRecord, EnrichmentOutput, ExtractionOutput, TriageOutput};
use super::stage::{Stage, StagePayload, StageResult};
use crate::error::{FailureKind, TransitionError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw attributes of an album as discovered on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumInput {
    /// Album directory
    pub path: PathBuf,
    /// Directory name, often "Artist - Album (Year)"
    pub folder_name: String,
    /// Ancestor directory names between the scan root and the album
    pub parent_dirs: Vec<String>,
    /// All files belonging to the album, disc subfolders included, sorted
    pub files: Vec<PathBuf>,
    /// Number of disc subfolders (1 for a flat album)
    pub disc_count: u32,
}

/// Terminal failure of an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
}

/// One album moving through the pipeline
///
/// The stage only moves forward, and only through [`Item::advance`], which
/// refuses to leave a work stage that has no committed result.
#[derive(Debug, Clone)]
pub struct Item {
    /// Stable key (album path)
    pub identity: String,
    /// Changes whenever the album's files change
    pub change_fingerprint: String,
    pub input: AlbumInput,
    stage: Stage,
    results: Vec<StageResult>,
    failure: Option<StageFailure>,
}

impl Item {
    pub fn new(identity: impl Into<String>, change_fingerprint: impl Into<String>, input: AlbumInput) -> Self {
        Self {
            identity: identity.into(),
            change_fingerprint: change_fingerprint.into(),
            input,
            stage: Stage::Pending,
            results: Vec::new(),
            failure: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        self.failure.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.stage == Stage::Done || self.failure.is_some()
    }

    /// Move to the next stage
    pub fn advance(&mut self) -> Result<Stage, TransitionError> {
        if self.failure.is_some() {
            return Err(TransitionError::Terminal(self.stage));
        }
        let next = self.stage.next().ok_or(TransitionError::Terminal(self.stage))?;
        if self.stage.is_work_stage() && self.result(self.stage).is_none() {
            return Err(TransitionError::MissingResult(self.stage));
        }
        self.stage = next;
        Ok(next)
    }

    /// Commit the result of the current stage
    pub fn commit(&mut self, result: StageResult) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.stage));
        }
        if result.stage() != self.stage {
            return Err(TransitionError::StageMismatch {
                current: self.stage,
                got: result.stage(),
            });
        }
        self.results.push(result);
        Ok(())
    }

    /// Enter the absorbing failed state at the current stage
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) {
        if self.failure.is_none() {
            self.failure = Some(StageFailure {
                stage: self.stage,
                kind,
                message: message.into(),
            });
        }
    }

    /// Execution-cache short-circuit: straight to `Done`
    pub fn mark_done_from_cache(&mut self) {
        if self.failure.is_none() {
            self.stage = Stage::Done;
        }
    }

    pub fn result(&self, stage: Stage) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage() == stage)
    }

    pub fn triage(&self) -> Option<&TriageOutput> {
        self.results.iter().find_map(|r| match &r.payload {
            StagePayload::Triage(out) => Some(out),
            _ => None,
        })
    }

    pub fn extraction(&self) -> Option<&ExtractionOutput> {
        self.results.iter().find_map(|r| match &r.payload {
            StagePayload::Extraction(out) => Some(out),
            _ => None,
        })
    }

    pub fn enrichment(&self) -> Option<&EnrichmentOutput> {
        self.results.iter().find_map(|r| match &r.payload {
            StagePayload::Enrichment(out) => Some(out),
            _ => None,
        })
    }

    pub fn canonical(&self) -> Option<&CanonicalRecord> {
        self.results.iter().find_map(|r| match &r.payload {
            StagePayload::Canonicalization(out) => Some(out),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::outputs::SampledTags;
    use crate::models::stage::StageMeta;

    fn triage_result() -> StageResult {
        StageResult::new(
            StagePayload::Triage(TriageOutput {
                track_count: 10,
                disc_count: 1,
                formats: vec![".flac".into()],
                skipped_files: 0,
                tags: SampledTags::default(),
            }),
            StageMeta::local(1),
        )
    }

    #[test]
    fn test_cannot_skip_a_stage() {
        let mut item = Item::new("/music/a", "n1-s1-m1", AlbumInput::default());
        assert_eq!(item.advance().unwrap(), Stage::Triage);

        assert_eq!(item.advance(), Err(TransitionError::MissingResult(Stage::Triage)));

        item.commit(triage_result()).unwrap();
        assert_eq!(item.advance().unwrap(), Stage::Extraction);
        assert!(item.triage().is_some());
    }

    #[test]
    fn test_result_must_match_current_stage() {
        let mut item = Item::new("/music/a", "fp", AlbumInput::default());
        item.advance().unwrap();
        item.commit(triage_result()).unwrap();
        item.advance().unwrap();

        let err = item.commit(triage_result()).unwrap_err();
        assert_eq!(
            err,
            TransitionError::StageMismatch {
                current: Stage::Extraction,
                got: Stage::Triage
            }
        );
    }

    #[test]
    fn test_failed_is_absorbing() {
        let mut item = Item::new("/music/a", "fp", AlbumInput::default());
        item.advance().unwrap();
        item.fail(FailureKind::UnsupportedInput, "no audio");
        item.fail(FailureKind::RemoteFatal, "later");

        assert!(item.is_terminal());
        let failure = item.failure().unwrap();
        assert_eq!(failure.stage, Stage::Triage);
        assert_eq!(failure.kind, FailureKind::UnsupportedInput);
        assert!(matches!(item.advance(), Err(TransitionError::Terminal(Stage::Triage))));
        assert!(item.commit(triage_result()).is_err());
    }

    #[test]
    fn test_cache_short_circuit() {
        let mut item = Item::new("/music/a", "fp", AlbumInput::default());
        item.mark_done_from_cache();
        assert_eq!(item.stage(), Stage::Done);
        assert!(item.is_terminal());
    }
}
