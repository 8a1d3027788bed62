use std::ops::RangeInclusive;

use log::{debug, warn};

use crate::catalog::model::{AudioIdentity, IdentityId};
use crate::identity::acoustic::{self, AcousticKey, ACCEPTANCE_THRESHOLD, AMBIGUITY_MARGIN};
use crate::identity::digest::ExactDigest;
use crate::Result;

/// Read access to the catalog, all the resolver needs.
pub trait CatalogView {
    fn lookup_exact(&self, digest: &ExactDigest) -> Result<Option<AudioIdentity>>;
    /// Identities whose acoustic bucket lies in `buckets`, ordered by id.
    fn lookup_buckets(&self, buckets: RangeInclusive<u32>) -> Result<Vec<AudioIdentity>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: IdentityId,
    pub exact_digest: ExactDigest,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    New,
    ExactDuplicate(IdentityId),
    PerceptualDuplicate { id: IdentityId, similarity: f64 },
    /// Ordered best first; ties go to the lowest exact digest.
    Ambiguous(Vec<Candidate>),
}

impl Verdict {
    /// The identity this verdict would attach to. `Ambiguous` never attaches.
    pub fn matched_identity(&self) -> Option<IdentityId> {
        match self {
            Verdict::ExactDuplicate(id) => Some(*id),
            Verdict::PerceptualDuplicate { id, .. } => Some(*id),
            Verdict::New | Verdict::Ambiguous(_) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::New => "new",
            Verdict::ExactDuplicate(_) => "exact",
            Verdict::PerceptualDuplicate { .. } => "perceptual",
            Verdict::Ambiguous(_) => "ambiguous",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub verdict: Verdict,
    /// Careful matching was requested but the candidate had no fingerprint,
    /// so only exact matching ran.
    pub careful_degraded: bool,
}

pub fn resolve(
    digest: &ExactDigest,
    acoustic_key: Option<&AcousticKey>,
    view: &impl CatalogView,
    careful: bool,
) -> Result<Resolution> {
    if let Some(existing) = view.lookup_exact(digest)? {
        debug!("Digest {} matches identity {}", digest, existing.id);
        return Ok(Resolution {
            verdict: Verdict::ExactDuplicate(existing.id),
            careful_degraded: false,
        });
    }

    if !careful {
        return Ok(Resolution { verdict: Verdict::New, careful_degraded: false });
    }

    let Some(key) = acoustic_key else {
        warn!("No fingerprint for digest {}, careful matching degraded to exact-only", digest);
        return Ok(Resolution { verdict: Verdict::New, careful_degraded: true });
    };

    let mut accepted = Vec::new();
    for identity in view.lookup_buckets(key.candidate_buckets())? {
        let Some(existing_key) = identity.acoustic_key.as_ref() else {
            continue;
        };
        let score = acoustic::similarity(key, existing_key);
        if score >= ACCEPTANCE_THRESHOLD {
            accepted.push(Candidate {
                id: identity.id,
                exact_digest: identity.exact_digest,
                similarity: score,
            });
        }
    }

    Ok(Resolution {
        verdict: rank(accepted),
        careful_degraded: false,
    })
}

fn rank(mut accepted: Vec<Candidate>) -> Verdict {
    accepted.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.exact_digest.cmp(&b.exact_digest))
    });
    accepted.dedup_by_key(|c| c.id);

    let (best, runner_up) = match accepted.as_slice() {
        [] => return Verdict::New,
        [only] => return Verdict::PerceptualDuplicate { id: only.id, similarity: only.similarity },
        [best, second, ..] => (best.clone(), second.similarity),
    };

    if best.similarity - runner_up >= AMBIGUITY_MARGIN {
        return Verdict::PerceptualDuplicate { id: best.id, similarity: best.similarity };
    }
    let floor = best.similarity - AMBIGUITY_MARGIN;
    accepted.retain(|c| c.similarity > floor);
    Verdict::Ambiguous(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::metadata::AudioMetadata;
    use crate::identity::acoustic::AcousticFingerprint;
    use crate::identity::digest::DIGEST_LEN;
    use chrono::Utc;

    #[derive(Default)]
    struct MemoryView {
        identities: Vec<AudioIdentity>,
    }

    impl MemoryView {
        fn with(mut self, id: i64, digest_byte: u8, words: Option<Vec<u32>>) -> Self {
            self.identities.push(AudioIdentity {
                id: IdentityId(id),
                exact_digest: digest(digest_byte),
                acoustic_key: words.map(|w| key(w)),
                metadata: AudioMetadata::default(),
                created_at: Utc::now(),
                references: Vec::new(),
            });
            self
        }
    }

    impl CatalogView for MemoryView {
        fn lookup_exact(&self, digest: &ExactDigest) -> Result<Option<AudioIdentity>> {
            Ok(self.identities.iter().find(|i| &i.exact_digest == digest).cloned())
        }

        fn lookup_buckets(&self, buckets: RangeInclusive<u32>) -> Result<Vec<AudioIdentity>> {
            Ok(self
                .identities
                .iter()
                .filter(|i| i.acoustic_key.as_ref().is_some_and(|k| buckets.contains(&k.bucket())))
                .cloned()
                .collect())
        }
    }

    fn digest(byte: u8) -> ExactDigest {
        ExactDigest::from_bytes([byte; DIGEST_LEN])
    }

    fn key(words: Vec<u32>) -> AcousticKey {
        AcousticKey::from_fingerprint(&AcousticFingerprint::new(words)).unwrap()
    }

    /// 100 words where the first `flipped` words differ in 8 bits each.
    fn words_with_noise(flipped: usize) -> Vec<u32> {
        (0..100).map(|i| if i < flipped { 0x1234_5678 ^ 0xFF } else { 0x1234_5678 }).collect()
    }

    #[test]
    fn exact_match_short_circuits_in_both_modes() {
        let view = MemoryView::default().with(1, 0xAA, Some(words_with_noise(0)));
        for careful in [false, true] {
            let resolution = resolve(&digest(0xAA), None, &view, careful).unwrap();
            assert_eq!(resolution.verdict, Verdict::ExactDuplicate(IdentityId(1)));
            assert!(!resolution.careful_degraded);
        }
    }

    #[test]
    fn careless_mode_never_matches_acoustically() {
        let view = MemoryView::default().with(1, 0xAA, Some(words_with_noise(0)));
        let candidate = key(words_with_noise(0));
        let resolution = resolve(&digest(0xBB), Some(&candidate), &view, false).unwrap();
        assert_eq!(resolution.verdict, Verdict::New);
    }

    #[test]
    fn careful_mode_accepts_close_fingerprint() {
        let view = MemoryView::default().with(1, 0xAA, Some(words_with_noise(0)));
        // 10 words x 8 bits of 3200 bits differ
        let candidate = key(words_with_noise(10));
        let resolution = resolve(&digest(0xBB), Some(&candidate), &view, true).unwrap();
        match resolution.verdict {
            Verdict::PerceptualDuplicate { id, similarity } => {
                assert_eq!(id, IdentityId(1));
                assert!((similarity - 0.975).abs() < 1e-9);
            }
            other => panic!("expected perceptual duplicate, got {:?}", other),
        }
    }

    #[test]
    fn careful_mode_rejects_distant_fingerprint() {
        let view = MemoryView::default().with(1, 0xAA, Some(vec![0; 100]));
        let candidate = key(vec![0xFFFF_0000; 100]);
        let resolution = resolve(&digest(0xBB), Some(&candidate), &view, true).unwrap();
        assert_eq!(resolution.verdict, Verdict::New);
    }

    #[test]
    fn missing_fingerprint_degrades_careful_mode() {
        let view = MemoryView::default().with(1, 0xAA, Some(words_with_noise(0)));
        let resolution = resolve(&digest(0xBB), None, &view, true).unwrap();
        assert_eq!(resolution.verdict, Verdict::New);
        assert!(resolution.careful_degraded);
    }

    #[test]
    fn near_ties_are_ambiguous_and_ordered_by_digest() {
        let view = MemoryView::default()
            .with(1, 0xCC, Some(words_with_noise(0)))
            .with(2, 0x11, Some(words_with_noise(0)))
            .with(3, 0x55, Some(words_with_noise(40)));
        let candidate = key(words_with_noise(0));
        let resolution = resolve(&digest(0xEE), Some(&candidate), &view, true).unwrap();
        match resolution.verdict {
            Verdict::Ambiguous(candidates) => {
                let ids: Vec<_> = candidates.iter().map(|c| c.id).collect();
                // identity 3 scores 0.9, outside the margin of the two exact copies
                assert_eq!(ids, vec![IdentityId(2), IdentityId(1)]);
            }
            other => panic!("expected ambiguous verdict, got {:?}", other),
        }
    }

    #[test]
    fn clear_winner_is_not_ambiguous() {
        let view = MemoryView::default()
            .with(1, 0x01, Some(words_with_noise(0)))
            .with(2, 0x02, Some(words_with_noise(40)));
        let candidate = key(words_with_noise(0));
        let resolution = resolve(&digest(0xEE), Some(&candidate), &view, true).unwrap();
        assert_eq!(
            resolution.verdict,
            Verdict::PerceptualDuplicate { id: IdentityId(1), similarity: 1.0 }
        );
    }

    #[test]
    fn stored_identities_without_fingerprint_are_skipped() {
        let view = MemoryView::default().with(1, 0xAA, None);
        let candidate = key(words_with_noise(0));
        let resolution = resolve(&digest(0xBB), Some(&candidate), &view, true).unwrap();
        assert_eq!(resolution.verdict, Verdict::New);
    }

    #[test]
    fn match_two_buckets_away_is_found() {
        // 470 frames sit in bucket 14, 532 in bucket 16
        let view = MemoryView::default().with(1, 0xAA, Some(vec![0x1234_5678; 470]));
        let candidate = key(vec![0x1234_5678; 532]);
        let resolution = resolve(&digest(0xBB), Some(&candidate), &view, true).unwrap();
        match resolution.verdict {
            Verdict::PerceptualDuplicate { id, similarity } => {
                assert_eq!(id, IdentityId(1));
                assert!((similarity - 470.0 / 532.0).abs() < 1e-9);
            }
            other => panic!("expected perceptual duplicate, got {:?}", other),
        }
    }

    #[test]
    fn distant_bucket_rival_makes_the_match_ambiguous() {
        // 540/480 = 0.889 and 425/480 = 0.885: within the margin of each other
        let view = MemoryView::default()
            .with(1, 0x10, Some(vec![0x1234_5678; 540]))
            .with(2, 0x20, Some(vec![0x1234_5678; 425]));
        let candidate = key(vec![0x1234_5678; 480]);
        let resolution = resolve(&digest(0xEE), Some(&candidate), &view, true).unwrap();
        match resolution.verdict {
            Verdict::Ambiguous(candidates) => {
                let ids: Vec<_> = candidates.iter().map(|c| c.id).collect();
                assert_eq!(ids, vec![IdentityId(1), IdentityId(2)]);
            }
            other => panic!("expected ambiguous verdict, got {:?}", other),
        }
    }
}
