use super::*;

use chrono::NaiveDate;

fn d(s: &str) -> Day {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Pinned clock for every test: far enough from the scenario dates that the
/// 30-day / 12-month window maths stays obvious.
fn today() -> Day {
    d("2026-09-01")
}

fn admin() -> Actor {
    Actor::admin("admin")
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("sabha_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    let path = test_wal_path(name);
    Engine::new(path, Arc::new(NotifyHub::new())).unwrap()
}

async fn submit(engine: &Engine, requester: &str, date: &str, slot: Slot) -> Ulid {
    let id = Ulid::new();
    engine
        .submit_booking(
            id,
            requester.into(),
            "Cultural evening".into(),
            Category::NgoB,
            d(date),
            slot,
            false,
            today(),
        )
        .await
        .unwrap();
    id
}

async fn slot_status(engine: &Engine, date: &str, slot: Slot) -> SlotStatus {
    let (bookings, blocks) = {
        match engine.day_register(d(date)) {
            Some(reg) => {
                let guard = reg.read().await;
                (guard.bookings.clone(), guard.blocks.clone())
            }
            None => (Vec::new(), Vec::new()),
        }
    };
    resolve_status(d(date), slot, &bookings, &blocks)
}

// ── Submission ───────────────────────────────────────────

#[tokio::test]
async fn submit_creates_pending_record() {
    let engine = new_engine("submit_pending.wal");
    let id = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;

    let record = engine.get_booking(id).await.unwrap();
    assert_eq!(record.status, BookingStatus::Pending);
    assert_eq!(record.refund, None);
    assert_eq!(slot_status(&engine, "2026-10-14", Slot::Morning).await, SlotStatus::Pending);
}

#[tokio::test]
async fn submit_outside_advance_window_fails() {
    let engine = new_engine("submit_window.wal");

    // 10 days ahead: too soon.
    let result = engine
        .submit_booking(
            Ulid::new(),
            "rotary".into(),
            "x".into(),
            Category::PrivateC,
            d("2026-09-11"),
            Slot::Morning,
            false,
            today(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::OutsideWindow(_))));

    // 2 years ahead: too far.
    let result = engine
        .submit_booking(
            Ulid::new(),
            "rotary".into(),
            "x".into(),
            Category::PrivateC,
            d("2028-09-01"),
            Slot::Morning,
            false,
            today(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::OutsideWindow(_))));
}

#[tokio::test]
async fn submit_empty_event_name_fails() {
    let engine = new_engine("submit_name.wal");
    let result = engine
        .submit_booking(
            Ulid::new(),
            "rotary".into(),
            "   ".into(),
            Category::NgoB,
            d("2026-10-14"),
            Slot::Morning,
            false,
            today(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn duplicate_pending_requests_coexist() {
    let engine = new_engine("dup_pending.wal");
    submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
    submit(&engine, "lions", "2026-10-14", Slot::Morning).await;

    assert_eq!(engine.bookings_on(d("2026-10-14")).await.len(), 2);
    assert_eq!(slot_status(&engine, "2026-10-14", Slot::Morning).await, SlotStatus::Pending);
}

#[tokio::test]
async fn submit_on_booked_slot_refused() {
    let engine = new_engine("submit_booked.wal");
    let id = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
    engine.approve_booking(id, &admin(), today()).await.unwrap();

    let result = engine
        .submit_booking(
            Ulid::new(),
            "lions".into(),
            "x".into(),
            Category::NgoB,
            d("2026-10-14"),
            Slot::Morning,
            false,
            today(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::Conflict { .. })));

    // The other shift on the same day still accepts requests.
    submit(&engine, "lions", "2026-10-14", Slot::Evening).await;
}

#[tokio::test]
async fn submit_on_blocked_date_refused() {
    let engine = new_engine("submit_blocked.wal");
    engine
        .create_block(
            Ulid::new(),
            d("2026-10-14"),
            "election counting".into(),
            BlockKind::State,
            &admin(),
            today(),
        )
        .await
        .unwrap();

    let result = engine
        .submit_booking(
            Ulid::new(),
            "rotary".into(),
            "x".into(),
            Category::NgoB,
            d("2026-10-14"),
            Slot::Evening,
            false,
            today(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::DateBlocked(_))));
}

// ── Approval and the exclusivity invariant ───────────────

#[tokio::test]
async fn approved_booking_occupies_slot_only() {
    let engine = new_engine("approve_occupies.wal");
    let id = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
    engine.approve_booking(id, &admin(), today()).await.unwrap();

    assert_eq!(slot_status(&engine, "2026-10-14", Slot::Morning).await, SlotStatus::Booked);
    assert_eq!(slot_status(&engine, "2026-10-14", Slot::Evening).await, SlotStatus::Available);
}

#[tokio::test]
async fn second_approval_on_same_slot_conflicts() {
    let engine = new_engine("approve_conflict.wal");
    let first = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
    let second = submit(&engine, "lions", "2026-10-14", Slot::Morning).await;

    engine.approve_booking(first, &admin(), today()).await.unwrap();
    let result = engine.approve_booking(second, &admin(), today()).await;
    assert!(matches!(result, Err(EngineError::Conflict { .. })));

    // The loser is still pending, not mutated.
    let record = engine.get_booking(second).await.unwrap();
    assert_eq!(record.status, BookingStatus::Pending);
}

#[tokio::test]
async fn block_cascade_beats_pending_approval() {
    let engine = new_engine("approve_blocked.wal");
    let id = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
    engine
        .create_block(
            Ulid::new(),
            d("2026-10-14"),
            "official exigency".into(),
            BlockKind::Emergency,
            &admin(),
            today(),
        )
        .await
        .unwrap();

    // Cascade already cancelled it; approving now is an invalid transition.
    let result = engine.approve_booking(id, &admin(), today()).await;
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));
}

#[tokio::test]
async fn reject_frees_nothing_but_clears_pending() {
    let engine = new_engine("reject.wal");
    let id = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
    engine.reject_booking(id, &admin(), today()).await.unwrap();

    let record = engine.get_booking(id).await.unwrap();
    assert_eq!(record.status, BookingStatus::Rejected);
    assert_eq!(slot_status(&engine, "2026-10-14", Slot::Morning).await, SlotStatus::Available);
}

#[tokio::test]
async fn requester_cannot_approve() {
    let engine = new_engine("requester_approve.wal");
    let id = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
    let result = engine
        .approve_booking(id, &Actor::requester("rotary"), today())
        .await;
    assert!(matches!(result, Err(EngineError::Forbidden { .. })));
}

// ── Cancellation and revocation ──────────────────────────

#[tokio::test]
async fn owner_cancel_forfeits_and_frees_slot() {
    let engine = new_engine("owner_cancel.wal");
    let id = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;

    engine
        .cancel_booking(id, &Actor::requester("rotary"), today())
        .await
        .unwrap();

    let record = engine.get_booking(id).await.unwrap();
    assert_eq!(record.status, BookingStatus::Cancelled);
    assert_eq!(record.refund, Some(RefundTerms::Forfeit));
    assert_eq!(slot_status(&engine, "2026-10-14", Slot::Morning).await, SlotStatus::Available);
}

#[tokio::test]
async fn stranger_cancel_rejected_and_record_untouched() {
    let engine = new_engine("stranger_cancel.wal");
    let id = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
    let before = engine.get_booking(id).await.unwrap();

    let result = engine
        .cancel_booking(id, &Actor::requester("lions"), today())
        .await;
    assert!(matches!(result, Err(EngineError::Forbidden { .. })));
    assert_eq!(engine.get_booking(id).await.unwrap(), before);
}

#[tokio::test]
async fn invalid_transition_leaves_record_unchanged() {
    let engine = new_engine("invalid_transition.wal");
    let id = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
    engine
        .cancel_booking(id, &Actor::requester("rotary"), today())
        .await
        .unwrap();
    let before = engine.get_booking(id).await.unwrap();

    let result = engine.approve_booking(id, &admin(), today()).await;
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));
    assert_eq!(engine.get_booking(id).await.unwrap(), before);
}

#[tokio::test]
async fn revocation_reason_decides_refund() {
    let engine = new_engine("revoke_refund.wal");
    let exigency = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
    let ordinary = submit(&engine, "lions", "2026-10-14", Slot::Evening).await;
    engine.approve_booking(exigency, &admin(), today()).await.unwrap();
    engine.approve_booking(ordinary, &admin(), today()).await.unwrap();

    engine
        .revoke_booking(exigency, "official exigency", &admin(), today())
        .await
        .unwrap();
    engine
        .revoke_booking(ordinary, "incomplete papers", &admin(), today())
        .await
        .unwrap();

    assert_eq!(
        engine.get_booking(exigency).await.unwrap().refund,
        Some(RefundTerms::FullRefund)
    );
    assert_eq!(
        engine.get_booking(ordinary).await.unwrap().refund,
        Some(RefundTerms::Forfeit)
    );
}

#[tokio::test]
async fn payment_step_confirms_allotment() {
    let engine = new_engine("payment.wal");
    let id = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
    engine.approve_booking(id, &admin(), today()).await.unwrap();
    engine
        .confirm_booking(id, &Actor::requester("rotary"), today())
        .await
        .unwrap();

    let record = engine.get_booking(id).await.unwrap();
    assert_eq!(record.status, BookingStatus::Confirmed);
    assert_eq!(slot_status(&engine, "2026-10-14", Slot::Morning).await, SlotStatus::Booked);

    // A settled allotment is out of the owner's reach; only revocation ends it.
    let result = engine
        .cancel_booking(id, &Actor::requester("rotary"), today())
        .await;
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));
}

// ── Blocks and the cascade ───────────────────────────────

#[tokio::test]
async fn block_makes_both_shifts_booked() {
    let engine = new_engine("block_both.wal");
    engine
        .create_block(
            Ulid::new(),
            d("2026-11-01"),
            "governor's visit".into(),
            BlockKind::Security,
            &admin(),
            today(),
        )
        .await
        .unwrap();

    assert_eq!(slot_status(&engine, "2026-11-01", Slot::Morning).await, SlotStatus::Booked);
    assert_eq!(slot_status(&engine, "2026-11-01", Slot::Evening).await, SlotStatus::Booked);

    let summary = engine.summarize_day(d("2026-11-01")).await;
    assert_eq!(summary.status, DayStatus::FullyBooked);
}

#[tokio::test]
async fn block_cascade_revokes_live_bookings_with_full_refund() {
    let engine = new_engine("block_cascade.wal");
    let approved = submit(&engine, "rotary", "2026-11-01", Slot::Morning).await;
    engine.approve_booking(approved, &admin(), today()).await.unwrap();
    let pending = submit(&engine, "lions", "2026-11-01", Slot::Evening).await;
    // Already-terminal records are left alone by the cascade.
    let rejected = submit(&engine, "jaycees", "2026-11-01", Slot::Evening).await;
    engine.reject_booking(rejected, &admin(), today()).await.unwrap();

    engine
        .create_block(
            Ulid::new(),
            d("2026-11-01"),
            "official exigency".into(),
            BlockKind::Emergency,
            &admin(),
            today(),
        )
        .await
        .unwrap();

    for id in [approved, pending] {
        let record = engine.get_booking(id).await.unwrap();
        assert_eq!(record.status, BookingStatus::Cancelled);
        assert_eq!(record.refund, Some(RefundTerms::FullRefund));
    }
    let record = engine.get_booking(rejected).await.unwrap();
    assert_eq!(record.status, BookingStatus::Rejected);
    assert_eq!(record.refund, None);
}

#[tokio::test]
async fn duplicate_blocks_coexist_and_lift_independently() {
    let engine = new_engine("dup_blocks.wal");
    let first = Ulid::new();
    let second = Ulid::new();
    for (id, reason) in [(first, "barricading"), (second, "route rehearsal")] {
        engine
            .create_block(
                id,
                d("2026-11-05"),
                reason.into(),
                BlockKind::Security,
                &admin(),
                today(),
            )
            .await
            .unwrap();
    }
    assert_eq!(engine.blocks_on(d("2026-11-05")).await.len(), 2);

    engine.lift_block(first, &admin()).await.unwrap();
    // One block standing still covers the whole day.
    assert_eq!(slot_status(&engine, "2026-11-05", Slot::Morning).await, SlotStatus::Booked);

    engine.lift_block(second, &admin()).await.unwrap();
    assert_eq!(slot_status(&engine, "2026-11-05", Slot::Morning).await, SlotStatus::Available);
}

#[tokio::test]
async fn lifting_block_never_resurrects_cancelled_bookings() {
    let engine = new_engine("lift_no_resurrect.wal");
    let id = submit(&engine, "rotary", "2026-11-01", Slot::Morning).await;
    engine.approve_booking(id, &admin(), today()).await.unwrap();

    let block_id = Ulid::new();
    engine
        .create_block(
            block_id,
            d("2026-11-01"),
            "official exigency".into(),
            BlockKind::Emergency,
            &admin(),
            today(),
        )
        .await
        .unwrap();
    engine.lift_block(block_id, &admin()).await.unwrap();

    // Date is available again precisely because the cancelled booking stayed
    // cancelled.
    assert_eq!(slot_status(&engine, "2026-11-01", Slot::Morning).await, SlotStatus::Available);
    assert_eq!(
        engine.get_booking(id).await.unwrap().status,
        BookingStatus::Cancelled
    );
}

#[tokio::test]
async fn requester_cannot_block_or_lift() {
    let engine = new_engine("requester_block.wal");
    let requester = Actor::requester("rotary");
    let result = engine
        .create_block(
            Ulid::new(),
            d("2026-11-01"),
            "mischief".into(),
            BlockKind::Emergency,
            &requester,
            today(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::Forbidden { .. })));

    let block_id = Ulid::new();
    engine
        .create_block(
            block_id,
            d("2026-11-01"),
            "genuine".into(),
            BlockKind::Maintenance,
            &admin(),
            today(),
        )
        .await
        .unwrap();
    let result = engine.lift_block(block_id, &requester).await;
    assert!(matches!(result, Err(EngineError::Forbidden { .. })));
}

#[tokio::test]
async fn lift_unknown_block_not_found() {
    let engine = new_engine("lift_unknown.wal");
    let result = engine.lift_block(Ulid::new(), &admin()).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn block_with_empty_reason_refused() {
    let engine = new_engine("block_empty_reason.wal");
    let result = engine
        .create_block(
            Ulid::new(),
            d("2026-11-01"),
            "".into(),
            BlockKind::Emergency,
            &admin(),
            today(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn owner_notified_of_cascade_with_refund_flag() {
    let engine = new_engine("notify_cascade.wal");
    let id = submit(&engine, "rotary", "2026-11-01", Slot::Morning).await;
    engine.approve_booking(id, &admin(), today()).await.unwrap();

    let mut rx = engine.notify.subscribe_requester("rotary");
    engine
        .create_block(
            Ulid::new(),
            d("2026-11-01"),
            "official exigency".into(),
            BlockKind::Emergency,
            &admin(),
            today(),
        )
        .await
        .unwrap();

    let event = rx.recv().await.unwrap();
    match event {
        Event::BookingCancelled { id: got, refund, .. } => {
            assert_eq!(got, id);
            assert_eq!(refund, RefundTerms::FullRefund);
        }
        other => panic!("expected BookingCancelled, got {other:?}"),
    }
}

#[tokio::test]
async fn date_channel_sees_block_events() {
    let engine = new_engine("notify_date.wal");
    let mut rx = engine.notify.subscribe_date(d("2026-11-02"));

    engine
        .create_block(
            Ulid::new(),
            d("2026-11-02"),
            "fumigation".into(),
            BlockKind::Maintenance,
            &admin(),
            today(),
        )
        .await
        .unwrap();

    assert!(matches!(rx.recv().await.unwrap(), Event::BlockCreated { .. }));
}

// ── Calendar queries ─────────────────────────────────────

#[tokio::test]
async fn calendar_mixes_known_and_untouched_days() {
    let engine = new_engine("calendar.wal");
    let id = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
    engine.approve_booking(id, &admin(), today()).await.unwrap();
    submit(&engine, "lions", "2026-10-15", Slot::Evening).await;

    let days = engine.calendar(d("2026-10-13"), d("2026-10-16")).await.unwrap();
    assert_eq!(days.len(), 4);
    assert_eq!(days[0].status, DayStatus::Open);
    assert_eq!(days[1].status, DayStatus::PartiallyBooked);
    assert_eq!(days[2].status, DayStatus::HasPending);
    assert_eq!(days[3].status, DayStatus::Open);
}

#[tokio::test]
async fn calendar_window_capped() {
    let engine = new_engine("calendar_cap.wal");
    let result = engine.calendar(d("2026-01-01"), d("2028-01-01")).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn requester_dashboard_lists_own_bookings_only() {
    let engine = new_engine("dashboard.wal");
    submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
    submit(&engine, "rotary", "2026-10-20", Slot::Evening).await;
    submit(&engine, "lions", "2026-10-14", Slot::Evening).await;

    let own = engine.bookings_for_requester("rotary").await;
    assert_eq!(own.len(), 2);
    assert!(own.iter().all(|b| b.requester == "rotary"));
    // Oldest date first.
    assert!(own[0].date <= own[1].date);

    assert_eq!(engine.list_bookings().await.len(), 3);
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn restart_replays_full_state() {
    let path = test_wal_path("restart.wal");

    let booking_id;
    let cancelled_id;
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        booking_id = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
        engine.approve_booking(booking_id, &admin(), today()).await.unwrap();

        cancelled_id = submit(&engine, "lions", "2026-10-14", Slot::Evening).await;
        engine
            .cancel_booking(cancelled_id, &Actor::requester("lions"), today())
            .await
            .unwrap();

        engine
            .create_block(
                Ulid::new(),
                d("2026-12-01"),
                "year-end audit".into(),
                BlockKind::Maintenance,
                &admin(),
                today(),
            )
            .await
            .unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();

    let record = engine.get_booking(booking_id).await.unwrap();
    assert_eq!(record.status, BookingStatus::Approved);

    let record = engine.get_booking(cancelled_id).await.unwrap();
    assert_eq!(record.status, BookingStatus::Cancelled);
    assert_eq!(record.refund, Some(RefundTerms::Forfeit));

    assert_eq!(slot_status(&engine, "2026-12-01", Slot::Morning).await, SlotStatus::Booked);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");

    let id;
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        id = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
        engine.approve_booking(id, &admin(), today()).await.unwrap();
        // Churn the WAL: blocks placed and lifted.
        for _ in 0..20 {
            let block_id = Ulid::new();
            engine
                .create_block(
                    block_id,
                    d("2026-11-20"),
                    "drill".into(),
                    BlockKind::Security,
                    &admin(),
                    today(),
                )
                .await
                .unwrap();
            engine.lift_block(block_id, &admin()).await.unwrap();
        }

        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compaction should shrink the WAL");
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let record = engine.get_booking(id).await.unwrap();
    assert_eq!(record.status, BookingStatus::Approved);
    assert!(engine.blocks_on(d("2026-11-20")).await.is_empty());
}

#[tokio::test]
async fn duplicate_submission_id_rejected() {
    let engine = new_engine("dup_id.wal");
    let id = submit(&engine, "rotary", "2026-10-14", Slot::Morning).await;
    let result = engine
        .submit_booking(
            id,
            "rotary".into(),
            "again".into(),
            Category::NgoB,
            d("2026-10-20"),
            Slot::Morning,
            false,
            today(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}
