use std::collections::BTreeMap;
use log::warn;
use serde::{Deserialize, Serialize};

/// Container/codec metadata reported by a fingerprint provider.
///
/// Informational only: none of these fields take part in identity. The catalog
/// keeps the most recently seen metadata for each identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadata {
    pub format_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_long_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub streams: Vec<StreamMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub index: u32,
    pub codec_type: String,
    pub codec_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bits_per_sample: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_base: Option<TimeBase>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    pub numer: u32,
    pub denom: u32,
}

impl TimeBase {
    /// Returns `None` for a zero denominator, which some containers report for
    /// streams without timing information.
    pub fn new(numer: u32, denom: u32) -> Option<Self> {
        if denom == 0 {
            warn!("Ignoring time base {}/0 with zero denominator", numer);
            return None;
        }
        Some(Self { numer, denom })
    }

    pub fn to_millis(&self, ticks: u64) -> u64 {
        (u128::from(ticks) * u128::from(self.numer) * 1000 / u128::from(self.denom)) as u64
    }
}

impl AudioMetadata {
    /// The first audio stream, which is the one the exact digest is taken over.
    pub fn primary_stream(&self) -> Option<&StreamMetadata> {
        self.streams.iter().find(|s| s.codec_type == "audio")
    }

    pub fn codec_name(&self) -> Option<&str> {
        self.primary_stream().map(|s| s.codec_name.as_str())
    }

    /// Fills the container bit rate from size and duration when the provider
    /// could not report one.
    pub fn with_estimated_bit_rate(mut self, size_bytes: u64) -> Self {
        if self.bit_rate.is_none() {
            if let Some(duration_ms) = self.duration_ms.filter(|d| *d > 0) {
                let bits_per_ms = (size_bytes * 8) as f64 / duration_ms as f64;
                self.bit_rate = Some((bits_per_ms * 1000.0) as u32);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_denominator_time_base_is_dropped() {
        assert!(TimeBase::new(1, 0).is_none());
        assert_eq!(TimeBase::new(1, 44_100), Some(TimeBase { numer: 1, denom: 44_100 }));
    }

    #[test]
    fn time_base_converts_ticks_to_millis() {
        let tb = TimeBase::new(1, 44_100).unwrap();
        assert_eq!(tb.to_millis(44_100 * 3), 3000);
    }

    #[test]
    fn bit_rate_is_estimated_only_when_missing() {
        let meta = AudioMetadata {
            format_name: "wav".into(),
            duration_ms: Some(2000),
            ..Default::default()
        };
        // 1 MB over 2 s
        let estimated = meta.clone().with_estimated_bit_rate(1_000_000);
        assert_eq!(estimated.bit_rate, Some(4_000_000));

        let reported = AudioMetadata { bit_rate: Some(320_000), ..meta };
        assert_eq!(reported.with_estimated_bit_rate(1_000_000).bit_rate, Some(320_000));
    }

    #[test]
    fn metadata_round_trips_through_json_without_empty_fields() {
        let meta = AudioMetadata {
            format_name: "flac".into(),
            streams: vec![StreamMetadata {
                index: 0,
                codec_type: "audio".into(),
                codec_name: "flac".into(),
                sample_rate: Some(48_000),
                channels: Some(2),
                ..Default::default()
            }],
            ..Default::default()
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(!json.contains("tags"));
        let back: AudioMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back.codec_name(), Some("flac"));
    }
}
