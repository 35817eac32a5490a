//! Certification state machine tests against real ledgers.
//!
//! Covers the single-certificate guarantee under concurrency, the per-stage
//! floor, unacknowledged certificates and rebuilding from SQLite.

mod common;

use std::sync::Arc;

use agritrace::domain::{CertificationState, STAGE_COUNT};
use agritrace::infra::LedgerRecorder;
use agritrace::{InMemoryLedger, SqliteLedger};

use common::{batch, full_evidence, stage, state_machine, verified, FlakyLedger};

#[tokio::test]
async fn test_full_evidence_issues_certificate() {
    let ledger = Arc::new(InMemoryLedger::new());
    let machine = state_machine(ledger.clone());
    let mut events = machine.subscribe();

    let evidence = full_evidence("BATCH-1");
    let mut issued = Vec::new();
    for image in &evidence {
        let outcome = machine.on_verified_image(image).await.unwrap();
        assert!(outcome.counted);
        if let Some(event) = outcome.certificate_issued {
            issued.push(event);
        }
    }

    assert_eq!(issued.len(), 1);
    let event = events.try_recv().unwrap();
    assert_eq!(event, issued[0]);
    assert!(event.qr_target_url.ends_with(&event.certificate_id));

    let certificate = machine.certificate(&batch("BATCH-1")).await.unwrap().unwrap();
    assert_eq!(certificate.certificate_id, event.certificate_id);
    assert_eq!(certificate.ledger_transactions.len(), evidence.len());
    assert!(certificate.verify_hash());
    assert_eq!(ledger.certificate_count().await, 1);

    let status = machine.batch_status(&batch("BATCH-1")).await.unwrap();
    assert_eq!(status.state(), CertificationState::Certified);
    assert_eq!(status.certificate_id.as_deref(), Some(event.certificate_id.as_str()));
}

#[tokio::test]
async fn test_evidence_after_certification_mints_nothing() {
    let ledger = Arc::new(InMemoryLedger::new());
    let machine = state_machine(ledger.clone());

    for image in &full_evidence("BATCH-1") {
        machine.on_verified_image(image).await.unwrap();
    }
    let extra = machine
        .on_verified_image(&verified("BATCH-1", 4, 9))
        .await
        .unwrap();

    assert!(extra.counted);
    assert!(extra.certificate_issued.is_none());
    assert_eq!(extra.state, CertificationState::Certified);
    assert_eq!(extra.stages.get(stage(4)), 3);
    assert_eq!(ledger.certificate_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_issue_exactly_one_certificate() {
    let ledger = Arc::new(InMemoryLedger::new());
    let machine = Arc::new(state_machine(ledger.clone()));
    let mut events = machine.subscribe();

    // Extra images per stage so several events can observe eligibility
    let mut images = full_evidence("BATCH-C");
    for n in 1..=STAGE_COUNT as u8 {
        images.push(verified("BATCH-C", n, 2));
    }

    let handles: Vec<_> = images
        .into_iter()
        .map(|image| {
            let machine = machine.clone();
            tokio::spawn(async move { machine.on_verified_image(&image).await })
        })
        .collect();

    let mut issued = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if outcome.certificate_issued.is_some() {
            issued += 1;
        }
    }

    assert_eq!(issued, 1);
    assert!(events.try_recv().is_ok());
    assert!(events.try_recv().is_err());
    assert_eq!(ledger.certificate_count().await, 1);

    let status = machine.batch_status(&batch("BATCH-C")).await.unwrap();
    assert_eq!(status.verified_total(), 3 * STAGE_COUNT as u64);
}

#[tokio::test]
async fn test_one_thin_stage_blocks_certification() {
    let ledger = Arc::new(InMemoryLedger::new());
    let machine = state_machine(ledger.clone());

    for n in (1..=STAGE_COUNT as u8).filter(|n| *n != 3 && *n != 7) {
        machine.on_verified_image(&verified("BATCH-F", n, 0)).await.unwrap();
        machine.on_verified_image(&verified("BATCH-F", n, 1)).await.unwrap();
    }
    for salt in 0..50 {
        machine
            .on_verified_image(&verified("BATCH-F", 7, salt))
            .await
            .unwrap();
    }

    let status = machine.batch_status(&batch("BATCH-F")).await.unwrap();
    assert_eq!(status.stages.get(stage(7)), 50);
    assert_eq!(status.stages.get(stage(3)), 0);
    assert_eq!(status.state(), CertificationState::Collecting);
    assert_eq!(status.missing_stages(), vec![stage(3)]);
    assert_eq!(ledger.certificate_count().await, 0);

    // One image at stage 3 is still one short of the floor
    let outcome = machine
        .on_verified_image(&verified("BATCH-F", 3, 0))
        .await
        .unwrap();
    assert!(outcome.certificate_issued.is_none());
    assert_eq!(outcome.state, CertificationState::Collecting);

    let outcome = machine
        .on_verified_image(&verified("BATCH-F", 3, 1))
        .await
        .unwrap();
    assert!(outcome.certificate_issued.is_some());
}

#[tokio::test]
async fn test_duplicate_image_counts_once() {
    let ledger = Arc::new(InMemoryLedger::new());
    let machine = state_machine(ledger.clone());
    let image = verified("BATCH-D", 2, 0);

    let first = machine.on_verified_image(&image).await.unwrap();
    let second = machine.on_verified_image(&image).await.unwrap();

    assert!(first.counted);
    assert!(!second.counted);
    assert!(second.duplicate);
    assert_eq!(first.transaction_id, second.transaction_id);
    assert_eq!(second.stages.get(stage(2)), 1);
    assert_eq!(ledger.image_record_count().await, 1);
}

#[tokio::test]
async fn test_ledger_failure_changes_nothing() {
    let ledger = Arc::new(FlakyLedger::new());
    let machine = state_machine(ledger.clone());
    ledger.fail_images(1);

    let image = verified("BATCH-L", 1, 0);
    let err = machine.on_verified_image(&image).await.unwrap_err();
    assert_eq!(err.code(), "LEDGER_UNAVAILABLE");
    assert!(err.is_retryable());
    assert!(machine.batch_status(&batch("BATCH-L")).await.is_none());

    // The caller's retry goes through and counts once
    let outcome = machine.on_verified_image(&image).await.unwrap();
    assert!(outcome.counted);
    assert_eq!(outcome.stages.get(stage(1)), 1);
}

#[tokio::test]
async fn test_unacknowledged_certificate_stays_pending() {
    let ledger = Arc::new(FlakyLedger::new());
    let machine = state_machine(ledger.clone());
    let mut events = machine.subscribe();
    ledger.fail_certificates(1);

    let mut last = None;
    for image in &full_evidence("BATCH-P") {
        last = Some(machine.on_verified_image(image).await.unwrap());
    }
    let last = last.unwrap();
    assert!(last.certificate_issued.is_none());
    assert_eq!(last.state, CertificationState::Eligible);
    assert!(events.try_recv().is_err());

    let status = machine.batch_status(&batch("BATCH-P")).await.unwrap();
    assert!(!status.certificate_issued);
    let pending = status.pending_certificate.unwrap();
    assert_eq!(ledger.inner().certificate_count().await, 0);

    let issued = machine.publish_pending().await;
    assert_eq!(issued.len(), 1);
    // The pending certificate is reused, not re-minted
    assert_eq!(issued[0].certificate_id, pending.certificate_id);
    assert_eq!(events.try_recv().unwrap(), issued[0]);
    assert_eq!(ledger.inner().certificate_count().await, 1);

    assert!(machine.publish_pending().await.is_empty());
}

#[tokio::test]
async fn test_rebuild_from_sqlite_ledger() {
    let ledger = SqliteLedger::in_memory().await.unwrap();
    ledger.initialize().await.unwrap();

    let first = state_machine(Arc::new(ledger.clone()));
    let mut certificate_id = None;
    for image in &full_evidence("BATCH-S") {
        if let Some(event) = first.on_verified_image(image).await.unwrap().certificate_issued {
            certificate_id = Some(event.certificate_id);
        }
    }
    let certificate_id = certificate_id.unwrap();

    // A fresh process knows nothing until it rebuilds
    let restarted = state_machine(Arc::new(ledger.clone()));
    assert!(restarted.batch_status(&batch("BATCH-S")).await.is_none());

    let rebuilt = restarted.rebuild_from_ledger(&batch("BATCH-S")).await.unwrap();
    assert!(rebuilt.certificate_issued);
    assert_eq!(rebuilt.certificate_id.as_deref(), Some(certificate_id.as_str()));
    for n in 1..=STAGE_COUNT as u8 {
        assert_eq!(rebuilt.stages.get(stage(n)), 2);
    }

    // Replayed events after a rebuild are duplicates and mint nothing
    let replay = restarted
        .on_verified_image(&verified("BATCH-S", 1, 0))
        .await
        .unwrap();
    assert!(replay.duplicate);
    assert!(!replay.counted);
    assert!(replay.certificate_issued.is_none());
    assert_eq!(ledger.certificate_count().await.unwrap(), 1);
    assert_eq!(
        ledger.records_for_batch(&batch("BATCH-S")).await.unwrap().len(),
        2 * STAGE_COUNT
    );
}

#[tokio::test]
async fn test_rebuild_certifies_eligible_uncertified_batch() {
    let ledger = SqliteLedger::in_memory().await.unwrap();
    ledger.initialize().await.unwrap();

    // Evidence reached the ledger but the process died before minting
    for image in &full_evidence("BATCH-R") {
        ledger
            .record_verified_image(&image.content_hash, &image.batch_id, image.stage)
            .await
            .unwrap();
    }

    let machine = state_machine(Arc::new(ledger.clone()));
    let rebuilt = machine.rebuild_from_ledger(&batch("BATCH-R")).await.unwrap();
    assert!(rebuilt.certificate_issued);
    assert_eq!(rebuilt.state(), CertificationState::Certified);
    assert_eq!(ledger.certificate_count().await.unwrap(), 1);
}
