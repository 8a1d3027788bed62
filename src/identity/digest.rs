//! Exact content digest over decoded PCM.
//!
//! Samples are canonicalized before hashing so that the same PCM decoded from
//! different containers or sample formats yields the same digest:
//!
//! - every sample is widened to a signed 32-bit integer (`i16` is shifted left
//!   by 16, `f32` is scaled by 2^31, rounded and clamped),
//! - samples are hashed interleaved, little-endian,
//! - the message is prefixed with [`DOMAIN_TAG`], the sample rate (`u32` LE)
//!   and the channel count (`u16` LE).
//!
//! The hash is SHA-256.

use std::fmt;
use sha2::{Digest, Sha256};

pub const DIGEST_LEN: usize = 32;

pub const DOMAIN_TAG: &[u8] = b"audiofs-pcm-v1";

const F32_SCALE: f64 = 2_147_483_648.0;

// Samples buffered per hasher update.
const HASH_CHUNK: usize = 4096;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExactDigest([u8; DIGEST_LEN]);

impl ExactDigest {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; DIGEST_LEN]>::try_from(bytes).ok().map(Self)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        hex::decode(s).ok().and_then(|bytes| Self::from_slice(&bytes))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ExactDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ExactDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExactDigest({})", &self.to_hex()[..12])
    }
}

/// Interleaved PCM in whatever sample format the decoder produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PcmSamples {
    I16(Vec<i16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
}

impl PcmSamples {
    pub fn len(&self) -> usize {
        match self {
            PcmSamples::I16(s) => s.len(),
            PcmSamples::I32(s) => s.len(),
            PcmSamples::F32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decoded stream handed over by a provider; the engine owns the hashing policy.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestSeed {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: PcmSamples,
}

impl DigestSeed {
    pub fn digest(&self) -> ExactDigest {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_TAG);
        hasher.update(self.sample_rate.to_le_bytes());
        hasher.update(self.channels.to_le_bytes());

        match &self.samples {
            PcmSamples::I16(s) => hash_canonical(&mut hasher, s.iter().map(|&v| i32::from(v) << 16)),
            PcmSamples::I32(s) => hash_canonical(&mut hasher, s.iter().copied()),
            PcmSamples::F32(s) => hash_canonical(&mut hasher, s.iter().map(|&v| canonical_f32(v))),
        }

        ExactDigest(hasher.finalize().into())
    }
}

fn canonical_f32(sample: f32) -> i32 {
    // NaN saturates to 0 through the cast.
    (f64::from(sample) * F32_SCALE)
        .round()
        .clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

fn hash_canonical(hasher: &mut Sha256, samples: impl Iterator<Item = i32>) {
    let mut buf = Vec::with_capacity(HASH_CHUNK * 4);
    for sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
        if buf.len() >= HASH_CHUNK * 4 {
            hasher.update(&buf);
            buf.clear();
        }
    }
    hasher.update(&buf);
}
