use std::path::Path;
use std::time::Duration;

use crate::audio::metadata::AudioMetadata;
use crate::identity::acoustic::AcousticFingerprint;
use crate::identity::digest::DigestSeed;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unreadable file: {0}")]
    Unreadable(String),
    #[error("unsupported format: {0}")]
    Unsupported(String),
    #[error("corrupt stream: {0}")]
    Corrupt(String),
    #[error("decoder timed out after {0:?}")]
    Timeout(Duration),
}

/// Everything a provider learns about one file.
#[derive(Debug, Clone)]
pub struct AnalyzedAudio {
    pub metadata: AudioMetadata,
    /// `None` when the decoder could not produce a fingerprint, e.g. for clips
    /// too short to analyze.
    pub fingerprint: Option<AcousticFingerprint>,
    /// Decoded PCM handed to the engine for hashing. Providers never hash.
    pub seed: DigestSeed,
}

/// Decoding and fingerprinting capability consumed by the engine.
///
/// Implementations may block for a long time; the pipeline bounds every call
/// with its decode timeout.
pub trait FingerprintProvider: Send + Sync {
    fn analyze(&self, path: &Path) -> Result<AnalyzedAudio, DecodeError>;
}
