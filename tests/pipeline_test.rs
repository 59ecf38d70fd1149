//! Submission-to-ledger flows against in-memory backends.

mod fixtures;
mod helpers;

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use eco_scan::db::memory::MemoryStore;
use eco_scan::db::RewardStore;
use eco_scan::error::ApiError;
use eco_scan::models::job::{JobState, ScanSource, VerificationJob};
use eco_scan::models::verification::SubmitScanRequest;
use eco_scan::models::voucher::Voucher;
use eco_scan::services::preprocess::JPEG_DATA_URL_PREFIX;
use eco_scan::services::storage::{photo_key, MemoryPhotoStore, PhotoStore};

use fixtures::*;
use helpers::*;

fn camera_scan(actor: &str) -> SubmitScanRequest {
    SubmitScanRequest {
        actor_id: Some(actor.to_string()),
        display_name: Some("Test Actor".to_string()),
        image: Some(png_data_url(64, 48)),
        simulated: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_verified_camera_scan_credits_and_issues_voucher() {
    let app = TestAppBuilder::new()
        .vision(ScriptedVision::replying(VisionReply::verified(80, "Cycling")))
        .build();

    let receipt = app.state.orchestrator.submit(camera_scan("cyclist")).await.unwrap();
    assert_eq!(receipt.state, JobState::Pending);

    let job = app.wait_for_terminal(receipt.job_id).await;
    assert_eq!(job.state, JobState::Completed);
    let outcome = job.outcome.unwrap();
    assert!(outcome.verified);
    assert_eq!(outcome.score, 80);
    assert_eq!(outcome.action_label, "Cycling");
    assert!(!outcome.fallback);

    let voucher = outcome.voucher.expect("voucher for a score above threshold");
    assert!(voucher.code.starts_with("ECO-"));
    assert_eq!(voucher.title, "20% off sustainable essentials");

    let account = app.store.get_account("cyclist").await.unwrap().unwrap();
    assert_eq!(account.total_score, 80);
    assert_eq!(account.display_name.as_deref(), Some("Test Actor"));
    assert_eq!(app.store.list_vouchers("cyclist").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_gallery_upload_earns_nothing() {
    let app = TestAppBuilder::new()
        .vision(ScriptedVision::replying(VisionReply::verified(90, "Recycling")))
        .build();

    let request = SubmitScanRequest {
        source: Some(ScanSource::Gallery),
        ..camera_scan("gallery-user")
    };
    let receipt = app.state.orchestrator.submit(request).await.unwrap();

    let job = app.wait_for_terminal(receipt.job_id).await;
    let outcome = job.outcome.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(outcome.verified);
    assert_eq!(outcome.score, 0);
    assert!(outcome.voucher.is_none());
    assert!(app.store.get_account("gallery-user").await.unwrap().is_none());
}

#[tokio::test]
async fn test_rejected_photo_scores_zero() {
    let app = TestAppBuilder::new()
        .vision(ScriptedVision::replying(VisionReply::rejected()))
        .build();

    let receipt = app.state.orchestrator.submit(camera_scan("nope")).await.unwrap();
    let outcome = app.wait_for_terminal(receipt.job_id).await.outcome.unwrap();

    assert!(!outcome.verified);
    assert_eq!(outcome.score, 0);
    assert!(outcome.voucher.is_none());
}

#[tokio::test]
async fn test_submission_without_photo_completes_unverified() {
    let vision = ScriptedVision::replying(VisionReply::verified(99, "Cycling"));
    let app = TestAppBuilder::new().vision(vision.clone()).build();

    let request = SubmitScanRequest {
        image: None,
        ..camera_scan("no-photo")
    };
    let receipt = app.state.orchestrator.submit(request).await.unwrap();
    let job = app.wait_for_terminal(receipt.job_id).await;

    assert_eq!(job.state, JobState::Completed);
    let outcome = job.outcome.unwrap();
    assert!(!outcome.verified);
    assert_eq!(outcome.score, 0);
    assert_eq!(vision.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_vision_timeout_falls_back_to_optimistic_score() {
    let app = TestAppBuilder::new()
        .vision(ScriptedVision::stalling(Duration::from_secs(5)))
        .policies(|p| p.vision.timeout = Duration::from_millis(50))
        .build();

    let receipt = app.state.orchestrator.submit(camera_scan("slow")).await.unwrap();
    let job = app.wait_for_terminal(receipt.job_id).await;

    assert_eq!(job.state, JobState::Completed);
    let outcome = job.outcome.unwrap();
    assert!(outcome.fallback);
    assert!(outcome.verified);
    assert!((20..=80).contains(&outcome.score));

    let total = app.store.get_account("slow").await.unwrap().unwrap().total_score;
    assert_eq!(total, i64::from(outcome.score));
}

#[tokio::test]
async fn test_unparsable_reply_falls_back() {
    let app = TestAppBuilder::new()
        .vision(ScriptedVision::replying(VisionReply::garbage()))
        .build();

    let receipt = app.state.orchestrator.submit(camera_scan("garbled")).await.unwrap();
    let outcome = app.wait_for_terminal(receipt.job_id).await.outcome.unwrap();
    assert!(outcome.fallback);
}

#[tokio::test]
async fn test_daily_cap_blocks_voucher_but_not_score() {
    let app = TestAppBuilder::new()
        .vision(ScriptedVision::replying(VisionReply::verified(70, "Composting")))
        .build();

    let now = Utc::now();
    for i in 0..5 {
        app.store.insert_voucher(Voucher {
            id: Uuid::new_v4(),
            actor_id: "capped".to_string(),
            title: format!("Earlier voucher {i}"),
            description: "Seeded".to_string(),
            code: format!("ECO-SEED000{i}"),
            used: false,
            created_at: now - chrono::Duration::hours(1),
            expires_at: now + chrono::Duration::days(30),
        });
    }

    let receipt = app.state.orchestrator.submit(camera_scan("capped")).await.unwrap();
    let outcome = app.wait_for_terminal(receipt.job_id).await.outcome.unwrap();

    assert_eq!(outcome.score, 70);
    assert!(outcome.voucher.is_none());
    assert_eq!(app.store.list_vouchers("capped").await.unwrap().len(), 5);
    assert_eq!(app.store.get_account("capped").await.unwrap().unwrap().total_score, 70);
}

#[tokio::test]
async fn test_model_drafted_voucher_keeps_local_code() {
    let app = TestAppBuilder::new()
        .vision(ScriptedVision::replying(VisionReply::verified(60, "Walking")))
        .text(std::sync::Arc::new(ScriptedText(voucher_draft("Free coffee refill"))))
        .build();

    let receipt = app.state.orchestrator.submit(camera_scan("walker")).await.unwrap();
    let voucher = app
        .wait_for_terminal(receipt.job_id)
        .await
        .outcome
        .unwrap()
        .voucher
        .unwrap();

    assert_eq!(voucher.title, "Free coffee refill");
    assert_ne!(voucher.code, "MODEL-CODE");
    assert!(voucher.code.starts_with("ECO-"));
}

#[tokio::test]
async fn test_camera_photo_is_normalized_in_storage() {
    let app = TestAppBuilder::new()
        .vision(ScriptedVision::replying(VisionReply::verified(40, "Cycling")))
        .build();

    let request = SubmitScanRequest {
        image: Some(png_data_url(2048, 1024)),
        simulated: false,
        ..camera_scan("big-photo")
    };
    let receipt = app.state.orchestrator.submit(request).await.unwrap();
    app.wait_for_terminal(receipt.job_id).await;

    let stored = app.photos.get(&photo_key(receipt.job_id)).await.unwrap();
    let stored = String::from_utf8(stored).unwrap();
    assert!(stored.starts_with(JPEG_DATA_URL_PREFIX));
}

#[tokio::test]
async fn test_simulated_photo_is_stored_as_sent() {
    let app = TestAppBuilder::new().build();
    let photo = png_data_url(32, 32);

    let request = SubmitScanRequest {
        image: Some(photo.clone()),
        ..camera_scan("simulator")
    };
    let receipt = app.state.orchestrator.submit(request).await.unwrap();
    app.wait_for_terminal(receipt.job_id).await;

    let stored = app.photos.get(&photo_key(receipt.job_id)).await.unwrap();
    assert_eq!(stored, photo.as_bytes());
}

#[tokio::test]
async fn test_eleventh_submission_is_rate_limited() {
    let app = TestAppBuilder::new().build();
    let request = SubmitScanRequest {
        actor_id: Some("spammy".to_string()),
        ..Default::default()
    };

    let mut outcomes = Vec::new();
    for _ in 0..12 {
        outcomes.push(app.state.orchestrator.submit(request.clone()).await);
    }

    assert!(outcomes[..10].iter().all(|r| r.is_ok()));
    for rejected in &outcomes[10..] {
        let Err(ApiError::RateLimited(decision)) = rejected else {
            panic!("expected rate limit, got {rejected:?}");
        };
        assert_eq!(decision.remaining, 0);
    }
}

#[tokio::test]
async fn test_honeypot_rejected_without_job() {
    let app = TestAppBuilder::new().build();
    let request = SubmitScanRequest {
        honeypot: Some("filled by a bot".to_string()),
        ..camera_scan("bot")
    };

    assert!(matches!(
        app.state.orchestrator.submit(request).await,
        Err(ApiError::BotDetected)
    ));
    assert!(app.state.orchestrator.leaderboard(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_reads_are_idempotent() {
    let app = TestAppBuilder::new()
        .vision(ScriptedVision::replying(VisionReply::verified(55, "Cycling")))
        .build();
    let receipt = app.state.orchestrator.submit(camera_scan("reader")).await.unwrap();
    app.wait_for_terminal(receipt.job_id).await;

    let first = app.state.orchestrator.get_status(receipt.job_id).await.unwrap();
    let second = app.state.orchestrator.get_status(receipt.job_id).await.unwrap();
    assert_eq!(first.outcome, second.outcome);
    assert_eq!(first.completed_at, second.completed_at);
    assert_eq!(app.store.get_account("reader").await.unwrap().unwrap().total_score, 55);
}

#[tokio::test]
async fn test_delete_reverses_credited_score() {
    let app = TestAppBuilder::new()
        .vision(ScriptedVision::replying(VisionReply::verified(45, "Cycling")))
        .build();

    let first = app.state.orchestrator.submit(camera_scan("deleter")).await.unwrap();
    let second = app.state.orchestrator.submit(camera_scan("deleter")).await.unwrap();
    app.wait_for_terminal(first.job_id).await;
    app.wait_for_terminal(second.job_id).await;
    assert_eq!(app.store.get_account("deleter").await.unwrap().unwrap().total_score, 90);

    let total = app
        .state
        .orchestrator
        .delete(first.job_id, Some("deleter".to_string()))
        .await
        .unwrap();

    assert_eq!(total, 45);
    assert!(!app.photos.contains(&photo_key(first.job_id)));
    assert!(matches!(
        app.state.orchestrator.get_status(first.job_id).await,
        Err(ApiError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scans_sum_exactly() {
    let app = TestAppBuilder::new()
        .vision(ScriptedVision::replying(VisionReply::verified(30, "Cycling")))
        .policies(|p| p.voucher.score_threshold = 101)
        .build();

    let receipts = join_all((0..10).map(|_| app.state.orchestrator.submit(camera_scan("crowd")))).await;
    for receipt in receipts {
        app.wait_for_terminal(receipt.unwrap().job_id).await;
    }

    let account = app.store.get_account("crowd").await.unwrap().unwrap();
    assert_eq!(account.total_score, 300);

    let board = app.state.orchestrator.leaderboard(Some(5)).await.unwrap();
    assert_eq!(board[0].actor_id, "crowd");
    assert_eq!(board[0].rank, 1);
}

#[tokio::test]
async fn test_restart_resumes_scan_left_pending() {
    let store = Arc::new(MemoryStore::new());
    let photos = Arc::new(MemoryPhotoStore::new());

    let before_restart = TestAppBuilder::new()
        .shared(store.clone(), photos.clone())
        .vision(ScriptedVision::stalling(Duration::from_secs(30)))
        .policies(|p| p.vision.timeout = Duration::from_secs(60))
        .build();
    let job_id = before_restart
        .state
        .orchestrator
        .submit(camera_scan("night-shift"))
        .await
        .unwrap()
        .job_id;

    let after_restart = TestAppBuilder::new()
        .shared(store.clone(), photos.clone())
        .vision(ScriptedVision::replying(VisionReply::verified(45, "Composting")))
        .build();
    let resumed = after_restart
        .state
        .orchestrator
        .resume_pending(Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(resumed, 1);

    let job = after_restart.wait_for_terminal(job_id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.outcome.unwrap().score, 45);
    let account = store.get_account("night-shift").await.unwrap().unwrap();
    assert_eq!(account.total_score, 45);
}

#[tokio::test]
async fn test_ledger_write_failure_marks_job_failed() {
    let app = TestAppBuilder::new()
        .vision(ScriptedVision::replying(VisionReply::verified(60, "Cycling")))
        .faults(StoreFaults {
            finalize: true,
            ..Default::default()
        })
        .build();

    let receipt = app.state.orchestrator.submit(camera_scan("unlucky")).await.unwrap();
    let job = app.wait_for_terminal(receipt.job_id).await;

    assert_eq!(job.state, JobState::Failed);
    assert!(job.outcome.is_none());
    let reason = job.failure_reason.expect("failure reason");
    assert!(reason.contains("finalize unavailable"), "{reason}");
    assert!(app.store.get_account("unlucky").await.unwrap().is_none());
}

#[tokio::test]
async fn test_voucher_cap_lookup_failure_marks_job_failed() {
    let app = TestAppBuilder::new()
        .vision(ScriptedVision::replying(VisionReply::verified(90, "Recycling")))
        .faults(StoreFaults {
            voucher_count: true,
            ..Default::default()
        })
        .build();

    let receipt = app.state.orchestrator.submit(camera_scan("sorter")).await.unwrap();
    let job = app.wait_for_terminal(receipt.job_id).await;

    assert_eq!(job.state, JobState::Failed);
    let reason = job.failure_reason.expect("failure reason");
    assert!(reason.contains("voucher count unavailable"), "{reason}");
    assert!(app.store.list_vouchers("sorter").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_stored_photo_marks_job_failed() {
    let app = TestAppBuilder::new().build();
    let job_id = Uuid::new_v4();
    app.store
        .insert_job(&VerificationJob {
            id: job_id,
            actor_id: "orphan".to_string(),
            display_name: None,
            avatar_ref: None,
            image_key: Some(photo_key(job_id)),
            is_public: true,
            source: ScanSource::Camera,
            simulated: false,
            state: JobState::Pending,
            outcome: None,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        })
        .await
        .unwrap();

    app.state.pipeline.run(job_id).await;

    let job = app.store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    let reason = job.failure_reason.expect("failure reason");
    assert!(reason.starts_with("Photo storage error"), "{reason}");
}

#[tokio::test]
async fn test_unsaved_job_leaves_no_stored_photo() {
    let app = TestAppBuilder::new()
        .faults(StoreFaults {
            insert: true,
            ..Default::default()
        })
        .build();

    let err = app
        .state
        .orchestrator
        .submit(camera_scan("ghost"))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Store(_)));
    assert!(app.photos.is_empty());
}
