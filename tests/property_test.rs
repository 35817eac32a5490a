//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for any valid input.

use proptest::prelude::*;

use agritrace::crypto::{compute_certificate_hash, fingerprint};
use agritrace::domain::{
    BatchId, BatchProvenance, ContentHash, FormatReport, StageCounts, StageNumber,
    ValidationAction, MIN_IMAGES_PER_STAGE, STAGE_COUNT,
};
use agritrace::validation::{visual_quality_score, PolicyEngine, PolicyInput};

// ============================================================================
// Custom Strategies
// ============================================================================

fn arb_format_report() -> impl Strategy<Value = FormatReport> {
    (any::<bool>(), any::<bool>()).prop_map(|(format_valid, integrity_valid)| FormatReport {
        format_valid,
        integrity_valid,
        issues: if format_valid && integrity_valid {
            vec![]
        } else {
            vec!["File too small".to_string()]
        },
    })
}

fn arb_score() -> impl Strategy<Value = f64> {
    prop_oneof![
        0.0f64..=1.0,
        Just(0.30),
        Just(0.85),
        Just(f64::NAN),
        -1.0f64..2.0,
    ]
}

fn arb_stage_counts() -> impl Strategy<Value = [u32; STAGE_COUNT]> {
    prop::array::uniform7(0u32..6)
}

fn decide(report: &FormatReport, score: f64, quality: u8) -> agritrace::ValidationResult {
    PolicyEngine::default().decide(PolicyInput {
        format: report,
        content_hash: ContentHash([7; 32]),
        authenticity_score: score,
        visual_quality: quality,
    })
}

// ============================================================================
// Decision policy
// ============================================================================

proptest! {
    #[test]
    fn prop_policy_is_deterministic(report in arb_format_report(), score in arb_score(), quality in 0u8..=100) {
        let a = decide(&report, score, quality);
        let b = decide(&report, score, quality);
        prop_assert_eq!(a.action, b.action);
        prop_assert_eq!(a.reason, b.reason);
    }

    #[test]
    fn prop_format_failure_always_rejects(score in arb_score(), quality in 0u8..=100) {
        let report = FormatReport {
            format_valid: false,
            integrity_valid: true,
            issues: vec!["File signature does not match any JPEG, PNG or WebP header".to_string()],
        };
        let result = decide(&report, score, quality);
        prop_assert_eq!(result.action, ValidationAction::AutoReject);
        prop_assert!(result.reason.starts_with("Rejected: "));
    }

    #[test]
    fn prop_score_is_clamped(report in arb_format_report(), score in arb_score(), quality in 0u8..=100) {
        let result = decide(&report, score, quality);
        prop_assert!((0.0..=1.0).contains(&result.authenticity_score));
        prop_assert_eq!(result.requires_human_review, result.action == ValidationAction::FlagForHuman);
    }

    #[test]
    fn prop_approval_requires_low_score_and_high_quality(score in 0.0f64..=1.0, quality in 0u8..=100) {
        let report = FormatReport { format_valid: true, integrity_valid: true, issues: vec![] };
        let result = decide(&report, score, quality);

        let expected = if score > 0.85 {
            ValidationAction::AutoReject
        } else if score < 0.30 && quality > 85 {
            ValidationAction::AutoApprove
        } else {
            ValidationAction::FlagForHuman
        };
        prop_assert_eq!(result.action, expected);
    }

    #[test]
    fn prop_quality_stays_in_range(size in 0usize..20_000_000, integrity in any::<bool>()) {
        let quality = visual_quality_score(size, integrity);
        prop_assert!(quality <= 100);
        if !integrity {
            prop_assert!(quality <= 50);
        }
    }
}

#[test]
fn test_policy_boundaries_are_strict() {
    let report = FormatReport {
        format_valid: true,
        integrity_valid: true,
        issues: vec![],
    };
    assert_eq!(decide(&report, 0.85, 100).action, ValidationAction::FlagForHuman);
    assert_eq!(decide(&report, 0.30, 100).action, ValidationAction::FlagForHuman);
    assert_eq!(decide(&report, 0.29, 85).action, ValidationAction::FlagForHuman);
    assert_eq!(decide(&report, 0.29, 86).action, ValidationAction::AutoApprove);
    assert_eq!(decide(&report, 0.851, 100).action, ValidationAction::AutoReject);
}

// ============================================================================
// Evidence and certificates
// ============================================================================

proptest! {
    #[test]
    fn prop_eligible_iff_every_stage_meets_floor(counts in arb_stage_counts()) {
        let mut batch = BatchProvenance::new(BatchId::from("B-prop"));
        for (i, count) in counts.iter().enumerate() {
            let stage = StageNumber::new(i as u8 + 1).unwrap();
            for salt in 0..*count {
                let mut hash = [0u8; 32];
                hash[0] = i as u8;
                hash[1..5].copy_from_slice(&salt.to_be_bytes());
                batch.record_verified(stage, ContentHash(hash), "tx");
            }
        }

        let expected = counts.iter().all(|c| *c >= MIN_IMAGES_PER_STAGE);
        prop_assert_eq!(batch.is_eligible(), expected);
        prop_assert_eq!(batch.stages, StageCounts::from_array(counts));
        prop_assert_eq!(batch.missing_stages().is_empty(), expected);
    }

    #[test]
    fn prop_recounting_a_hash_is_a_no_op(stage in 1u8..=7, seed in any::<[u8; 32]>(), repeats in 1usize..5) {
        let mut batch = BatchProvenance::new(BatchId::from("B-prop"));
        let stage = StageNumber::new(stage).unwrap();
        prop_assert!(batch.record_verified(stage, ContentHash(seed), "tx"));
        for _ in 0..repeats {
            prop_assert!(!batch.record_verified(stage, ContentHash(seed), "tx"));
        }
        prop_assert_eq!(batch.verified_total(), 1);
    }

    #[test]
    fn prop_fingerprint_is_deterministic(content in prop::collection::vec(any::<u8>(), 0..512)) {
        prop_assert_eq!(fingerprint(&content), fingerprint(&content));
    }

    #[test]
    fn prop_certificate_hash_binds_transaction_order(
        txs in prop::collection::vec("[a-f0-9]{8}", 2..6)
    ) {
        let mut reversed = txs.clone();
        reversed.reverse();
        prop_assume!(reversed != txs);
        prop_assert_ne!(
            compute_certificate_hash("B-prop", &txs),
            compute_certificate_hash("B-prop", &reversed)
        );
    }
}
