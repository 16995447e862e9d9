//! Service modules for the classification engine
//!
//! Caches, the remote client and its HTTP transport, and the filesystem
//! collaborators (album source, tag reader, report sinks).

pub mod album_source;
pub mod execution_cache;
pub mod fingerprint;
pub mod openai_transport;
pub mod remote_client;
pub mod report_sink;
pub mod response_cache;
pub mod tag_reader;

pub use album_source::DirectoryAlbumSource;
pub use execution_cache::{ExecutionCache, ExecutionLookup, ExecutionRecord};
pub use fingerprint::Fingerprint;
pub use openai_transport::OpenAiTransport;
pub use remote_client::{
    CallFailure, CallOutcome, CallReport, ClientStatsSnapshot, CompletionRequest, RemoteClient, ResponseShape,
    RetryPolicy, Transport,
};
pub use report_sink::{JsonReportSink, LogReportSink};
pub use response_cache::{Fetched, Origin, ResponseCache};
pub use tag_reader::LoftyTagReader;
