use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while decoding a file or validating the resulting PCM.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to decode audio: {0}")]
    DecodeFailed(String),

    #[error("input shorter than one analysis window ({samples} samples, need at least {n_fft})")]
    ShortInput { samples: usize, n_fft: usize },

    #[error("input contains non-finite samples")]
    InvalidAudio,
}

/// Errors raised by the persistent index.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("transaction conflict after retries: {0}")]
    Conflict(String),

    #[error("track '{0}' already has postings; append_postings is idempotent by id")]
    DuplicateTrack(String),

    #[error("index integrity violation: {0}")]
    Integrity(String),

    #[error(
        "config mismatch: index was built with {built}, query used {queried}; \
         the builder and matcher must use the same parameters"
    )]
    ConfigMismatch { built: String, queried: String },
}

/// One file's ingest failure, carried for logging and the run counter.
/// Never returned synchronously to an ingest caller; see `ingest::ingest_directory`.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{path}: {source}")]
    Audio {
        path: PathBuf,
        #[source]
        source: AudioError,
    },

    #[error("{path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
}
