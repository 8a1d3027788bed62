use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, warn};
use rusty_chromaprint::{Configuration, Fingerprinter};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::metadata::{AudioMetadata, StreamMetadata, TimeBase};
use crate::audio::provider::{AnalyzedAudio, DecodeError, FingerprintProvider};
use crate::identity::acoustic::AcousticFingerprint;
use crate::identity::digest::{DigestSeed, PcmSamples};

/// AcoustID fingerprints cover the first two minutes.
const DEFAULT_FINGERPRINT_SECS: u32 = 120;

/// Provider backed by symphonia for decoding and chromaprint for fingerprints.
pub struct SymphoniaProvider {
    max_fingerprint_secs: u32,
}

impl Default for SymphoniaProvider {
    fn default() -> Self {
        Self::new(DEFAULT_FINGERPRINT_SECS)
    }
}

impl SymphoniaProvider {
    pub fn new(max_fingerprint_secs: u32) -> Self {
        Self { max_fingerprint_secs }
    }
}

/// Feeds chromaprint packet by packet, up to a sample budget, through one
/// reusable `i16` buffer.
struct StreamingFingerprint {
    printer: Fingerprinter,
    max_secs: u32,
    state: PrintState,
    chunk: Vec<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrintState {
    Idle,
    Running { remaining: usize, consumed: usize },
    Rejected,
}

impl StreamingFingerprint {
    fn new(max_secs: u32) -> Self {
        Self {
            printer: Fingerprinter::new(&Configuration::preset_test2()),
            max_secs,
            state: PrintState::Idle,
            chunk: Vec::new(),
        }
    }

    /// The first packet fixes the stream layout.
    fn consume(&mut self, samples: &[i32], sample_rate: u32, channels: u16) {
        if self.state == PrintState::Idle {
            if let Err(e) = self.printer.start(sample_rate, u32::from(channels)) {
                warn!("Chromaprint rejected {} Hz / {} channels: {:?}", sample_rate, channels, e);
                self.state = PrintState::Rejected;
                return;
            }
            let budget = self.max_secs as usize * sample_rate as usize * usize::from(channels);
            self.state = PrintState::Running { remaining: budget, consumed: 0 };
        }

        let PrintState::Running { remaining, consumed } = &mut self.state else {
            return;
        };
        let take = samples.len().min(*remaining);
        if take == 0 {
            return;
        }
        self.chunk.clear();
        self.chunk.extend(samples[..take].iter().map(|s| (s >> 16) as i16));
        self.printer.consume(&self.chunk);
        *remaining -= take;
        *consumed += take;
    }

    fn consumed(&self) -> usize {
        match self.state {
            PrintState::Running { consumed, .. } => consumed,
            PrintState::Idle | PrintState::Rejected => 0,
        }
    }

    fn finish(mut self) -> Option<AcousticFingerprint> {
        if !matches!(self.state, PrintState::Running { .. }) {
            return None;
        }
        self.printer.finish();
        let words = self.printer.fingerprint();
        if words.is_empty() {
            debug!("Chromaprint produced no fingerprint for {} samples", self.consumed());
            return None;
        }
        Some(AcousticFingerprint::new(words.to_vec()))
    }
}

fn probe_error(err: SymphoniaError) -> DecodeError {
    match err {
        SymphoniaError::IoError(e) => DecodeError::Unreadable(e.to_string()),
        SymphoniaError::Unsupported(what) => DecodeError::Unsupported(what.to_string()),
        other => DecodeError::Corrupt(other.to_string()),
    }
}

impl FingerprintProvider for SymphoniaProvider {
    fn analyze(&self, path: &Path) -> Result<AnalyzedAudio, DecodeError> {
        let file = std::fs::File::open(path).map_err(|e| DecodeError::Unreadable(e.to_string()))?;
        let size_bytes = file
            .metadata()
            .map_err(|e| DecodeError::Unreadable(e.to_string()))?
            .len();

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        let mut hint = Hint::new();
        if let Some(ext) = &extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(probe_error)?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::Unsupported("no decodable audio track".into()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let codec_name = symphonia::default::get_codecs()
            .get_codec(params.codec)
            .map(|d| d.short_name.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let time_base = params.time_base.and_then(|tb| TimeBase::new(tb.numer, tb.denom));
        let duration_ms = match (time_base, params.n_frames, params.sample_rate) {
            (Some(tb), Some(frames), _) => Some(tb.to_millis(frames)),
            (None, Some(frames), Some(rate)) if rate > 0 => Some(frames * 1000 / u64::from(rate)),
            _ => None,
        };

        let mut tags = BTreeMap::new();
        if let Some(current) = format.metadata().current() {
            for tag in current.tags() {
                tags.insert(tag.key.clone(), tag.value.to_string());
            }
        }

        let mut decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(probe_error)?;

        let mut samples: Vec<i32> = Vec::new();
        let mut print = StreamingFingerprint::new(self.max_fingerprint_secs);
        let mut sample_rate = params.sample_rate.unwrap_or(0);
        let mut channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(DecodeError::Corrupt(format!("error reading packet: {}", e))),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;
                    let mut buffer = SampleBuffer::<i32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    print.consume(buffer.samples(), sample_rate, channels);
                    samples.extend_from_slice(buffer.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!("Skipping undecodable packet in {}: {}", path.display(), e);
                }
                Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
            }
        }

        if samples.is_empty() || sample_rate == 0 || channels == 0 {
            return Err(DecodeError::Corrupt("no audio frames decoded".into()));
        }

        let stream = StreamMetadata {
            index: 0,
            codec_type: "audio".to_string(),
            codec_name,
            sample_rate: Some(sample_rate),
            channels: Some(channels),
            bits_per_sample: params.bits_per_sample,
            bit_rate: None,
            frames: params.n_frames,
            time_base,
            tags: BTreeMap::new(),
        };

        let metadata = AudioMetadata {
            format_name: extension.unwrap_or_else(|| "unknown".to_string()),
            format_long_name: None,
            duration_ms,
            bit_rate: None,
            tags,
            streams: vec![stream],
        }
        .with_estimated_bit_rate(size_bytes);

        let fingerprint = print.finish();

        Ok(AnalyzedAudio {
            metadata,
            fingerprint,
            seed: DigestSeed {
                sample_rate,
                channels,
                samples: PcmSamples::I32(samples),
            },
        })
    }
}
