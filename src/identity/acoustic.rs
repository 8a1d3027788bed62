//! Perceptual identity: fixed-size acoustic keys and their similarity.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Words kept from a fingerprint (roughly 30 seconds of chromaprint output).
pub const ACOUSTIC_VECTOR_LEN: usize = 256;

/// Fingerprint frames per coarse bucket.
pub const BUCKET_WIDTH: u32 = 32;

/// Minimum similarity for a perceptual match.
pub const ACCEPTANCE_THRESHOLD: f64 = 0.85;

/// Accepted candidates closer than this to the best one make the match ambiguous.
pub const AMBIGUITY_MARGIN: f64 = 0.02;

/// Raw fingerprint as produced by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcousticFingerprint {
    pub words: Vec<u32>,
}

impl AcousticFingerprint {
    pub fn new(words: Vec<u32>) -> Self {
        Self { words }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcousticKey {
    // Always ACOUSTIC_VECTOR_LEN words, zero padded past `frames`.
    vector: Vec<u32>,
    frames: u32,
}

impl AcousticKey {
    /// Returns `None` for an empty fingerprint.
    pub fn from_fingerprint(fingerprint: &AcousticFingerprint) -> Option<Self> {
        if fingerprint.words.is_empty() {
            return None;
        }
        let mut vector = vec![0u32; ACOUSTIC_VECTOR_LEN];
        let valid = fingerprint.words.len().min(ACOUSTIC_VECTOR_LEN);
        vector[..valid].copy_from_slice(&fingerprint.words[..valid]);
        Some(Self {
            vector,
            frames: u32::try_from(fingerprint.words.len()).unwrap_or(u32::MAX),
        })
    }

    /// Rebuilds a key from its stored little-endian vector.
    pub fn from_stored(bytes: &[u8], frames: u32) -> Option<Self> {
        if bytes.len() != ACOUSTIC_VECTOR_LEN * 4 || frames == 0 {
            return None;
        }
        let vector = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self { vector, frames })
    }

    pub fn to_stored(&self) -> Vec<u8> {
        self.vector.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn bucket(&self) -> u32 {
        self.frames / BUCKET_WIDTH
    }

    /// Every bucket that can hold a key scoring at least
    /// [`ACCEPTANCE_THRESHOLD`] against this one. The length ratio alone caps
    /// the score, so matching frame counts lie within
    /// `[frames * threshold, frames / threshold]`, widened by one frame on
    /// each side to absorb rounding.
    pub fn candidate_buckets(&self) -> RangeInclusive<u32> {
        let frames = f64::from(self.frames);
        let shortest = ((frames * ACCEPTANCE_THRESHOLD).floor() as u32).saturating_sub(1);
        let longest = ((frames / ACCEPTANCE_THRESHOLD).ceil() + 1.0).min(f64::from(u32::MAX)) as u32;
        (shortest / BUCKET_WIDTH)..=(longest / BUCKET_WIDTH)
    }

    fn valid_len(&self) -> usize {
        (self.frames as usize).min(ACOUSTIC_VECTOR_LEN)
    }
}

/// Normalized Hamming similarity in `[0.0, 1.0]`.
///
/// Fraction of equal bits over the overlapping valid words, scaled by the ratio
/// of the shorter to the longer fingerprint so that an excerpt does not match
/// the full track.
pub fn similarity(a: &AcousticKey, b: &AcousticKey) -> f64 {
    let overlap = a.valid_len().min(b.valid_len());
    if overlap == 0 {
        return 0.0;
    }

    let matching_bits: u64 = a.vector[..overlap]
        .iter()
        .zip(&b.vector[..overlap])
        .map(|(x, y)| u64::from(32 - (x ^ y).count_ones()))
        .sum();
    let bit_similarity = matching_bits as f64 / (overlap as f64 * 32.0);

    let length_ratio = f64::from(a.frames.min(b.frames)) / f64::from(a.frames.max(b.frames));
    bit_similarity * length_ratio
}
