#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use audiofs::audio::provider::{AnalyzedAudio, DecodeError, FingerprintProvider};
use audiofs::identity::acoustic::AcousticFingerprint;
use audiofs::identity::digest::{DigestSeed, PcmSamples};
use audiofs::{AudioFs, AudioMetadata, CatalogStore, EngineOptions, StoreOptions};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    I16,
    I32,
    F32,
}

/// A decoded file described as JSON, so fixtures control PCM and
/// fingerprint exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FakeAudio {
    pub format: String,
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(default)]
    pub encoding: Encoding,
    pub samples: Vec<i16>,
    #[serde(default)]
    pub fingerprint: Option<Vec<u32>>,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub corrupt: bool,
}

impl FakeAudio {
    pub fn new(format: &str, samples: Vec<i16>, fingerprint: Option<Vec<u32>>) -> Self {
        Self {
            format: format.to_string(),
            sample_rate: 44_100,
            channels: 2,
            encoding: Encoding::I16,
            samples,
            fingerprint,
            delay_ms: 0,
            corrupt: false,
        }
    }

    pub fn encoded_as(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn corrupt(mut self) -> Self {
        self.corrupt = true;
        self
    }

    fn seed(&self) -> DigestSeed {
        let samples = match self.encoding {
            Encoding::I16 => PcmSamples::I16(self.samples.clone()),
            Encoding::I32 => PcmSamples::I32(self.samples.iter().map(|s| i32::from(*s) << 16).collect()),
            Encoding::F32 => PcmSamples::F32(self.samples.iter().map(|s| f32::from(*s) / 32768.0).collect()),
        };
        DigestSeed { sample_rate: self.sample_rate, channels: self.channels, samples }
    }
}

pub struct FakeProvider;

impl FingerprintProvider for FakeProvider {
    fn analyze(&self, path: &Path) -> Result<AnalyzedAudio, DecodeError> {
        let text = fs::read_to_string(path).map_err(|e| DecodeError::Unreadable(e.to_string()))?;
        let audio: FakeAudio =
            serde_json::from_str(&text).map_err(|e| DecodeError::Unsupported(e.to_string()))?;

        if audio.delay_ms > 0 {
            thread::sleep(Duration::from_millis(audio.delay_ms));
        }
        if audio.corrupt {
            return Err(DecodeError::Corrupt("fixture marked corrupt".into()));
        }

        Ok(AnalyzedAudio {
            metadata: AudioMetadata { format_name: audio.format.clone(), ..Default::default() },
            fingerprint: audio.fingerprint.clone().map(AcousticFingerprint::new),
            seed: audio.seed(),
        })
    }
}

pub fn write_fixture(dir: &Path, name: &str, audio: &FakeAudio) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_vec(audio).unwrap()).unwrap();
    path
}

/// Deterministic pseudo-random PCM.
pub fn samples(seed: u32, len: usize) -> Vec<i16> {
    let mut state = seed.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 16) as i16
        })
        .collect()
}

/// Deterministic pseudo-random fingerprint words.
pub fn fingerprint(seed: u32, frames: usize) -> Vec<u32> {
    let mut state = seed ^ 0x9E37_79B9;
    (0..frames)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        })
        .collect()
}

pub fn catalog_path(dir: &Path) -> PathBuf {
    dir.join("catalog").join("audiofs.db")
}

pub fn engine_with(dir: &Path, options: EngineOptions) -> AudioFs {
    AudioFs::open(catalog_path(dir), Arc::new(FakeProvider), options).unwrap()
}

pub fn engine(dir: &Path) -> AudioFs {
    engine_with(dir, EngineOptions::default())
}

pub fn engine_in_memory() -> AudioFs {
    AudioFs::with_store(
        CatalogStore::open_in_memory().unwrap(),
        Arc::new(FakeProvider),
        Duration::from_secs(10),
    )
}

pub fn quick_store_options() -> StoreOptions {
    StoreOptions { busy_timeout: Duration::from_millis(100), ..StoreOptions::default() }
}
