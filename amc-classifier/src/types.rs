//! Collaborator traits
//!
//! The engine consumes albums, tags, and report output through these narrow
//! interfaces. The binary wires in the filesystem implementations from
//! [`crate::services`]; tests use in-memory ones.

use crate::models::{Item, RunReport};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Best-effort embedded tags of a single track
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTags {
    pub artist: Option<String>,
    pub albumartist: Option<String>,
    pub album: Option<String>,
    pub date: Option<String>,
    pub genre: Option<String>,
}

/// Produces the finite set of albums for a run
pub trait AlbumSource: Send + Sync {
    fn discover(&self) -> amc_common::Result<Vec<Item>>;
}

/// Reads embedded metadata from a track
///
/// Must not fail: unreadable or corrupt files yield empty tags.
pub trait AttributeReader: Send + Sync {
    fn read_tags(&self, track: &Path) -> TrackTags;
}

/// Accepts the final run report for rendering
pub trait ReportSink: Send + Sync {
    fn publish(&self, report: &RunReport) -> amc_common::Result<()>;
}

/// Reader that never finds tags
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTags;

impl AttributeReader for NoTags {
    fn read_tags(&self, _track: &Path) -> TrackTags {
        TrackTags::default()
    }
}
