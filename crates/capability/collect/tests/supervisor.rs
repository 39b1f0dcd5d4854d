mod support;

use domain::{AccessMode, Conversion, DataType, Slot, Tag, TagKind, TagValue};
use ems_collect::CollectError;
use ems_storage::SlotRegistry;
use std::sync::atomic::Ordering;
use std::time::Duration;
use support::{FAKE, Harness, advance, io_tag, options};

fn scaled_tag(id: &str, slot_id: &str) -> Tag {
    io_tag(id, slot_id).with_conversion(Conversion::new(0.0, 100.0, 0.0, 10.0))
}

#[tokio::test(start_paused = true)]
async fn reconcile_connects_each_enabled_slot_once() {
    let h = Harness::new(&["a", "b", "c"]);
    h.registry.set_slot_enabled("c", false).expect("disable");
    h.add_tag(io_tag("a.t", "a"));
    h.add_tag(io_tag("b.t", "b"));

    h.supervisor.reconcile().await.expect("reconcile");
    assert_eq!(h.supervisor.connected_slots(), vec!["a", "b"]);
    assert!(h.is_online("a").await);
    assert!(h.is_online("b").await);
    assert!(!h.is_online("c").await);

    h.supervisor.reconcile().await.expect("reconcile");
    assert_eq!(h.script.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_reconcile_never_duplicates_a_wire() {
    let h = Harness::new(&["a"]);
    h.script.connect_delay_ms.store(100, Ordering::SeqCst);

    let (first, second) = tokio::join!(h.supervisor.reconcile(), h.supervisor.reconcile());
    first.expect("first");
    second.expect("second");

    assert_eq!(h.script.connects.load(Ordering::SeqCst), 1);
    assert_eq!(h.supervisor.connected_slots(), vec!["a"]);
}

#[tokio::test(start_paused = true)]
async fn failing_slot_does_not_block_others() {
    let h = Harness::new(&["a"]);
    h.registry
        .upsert_slot(Slot::new("b", "MISSING", ""))
        .expect("slot");

    h.supervisor.reconcile().await.expect("reconcile");
    assert!(h.supervisor.is_connected("a"));
    assert!(!h.supervisor.is_connected("b"));
    assert!(!h.is_online("b").await);
}

#[tokio::test(start_paused = true)]
async fn connect_failure_is_retried_on_next_pass() {
    let h = Harness::new(&["a"]);
    h.script.fail_connect.store(true, Ordering::SeqCst);

    h.supervisor.reconcile().await.expect("reconcile");
    assert!(!h.supervisor.is_connected("a"));
    assert!(!h.is_online("a").await);

    h.script.fail_connect.store(false, Ordering::SeqCst);
    h.supervisor.reconcile().await.expect("reconcile");
    assert!(h.supervisor.is_connected("a"));
    assert_eq!(h.script.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn polled_values_are_converted_into_cache() {
    let h = Harness::new(&["a"]);
    h.add_tag(scaled_tag("a.t", "a"));
    h.script.set_read_value(TagValue::F32(50.0));

    h.supervisor.reconcile().await.expect("reconcile");
    advance(600).await;

    let entry = h.cache.get("a.t").expect("get").expect("entry");
    assert_eq!(entry.value, TagValue::F32(5.0));
}

#[tokio::test(start_paused = true)]
async fn read_error_drops_wire_until_next_reconcile() {
    let h = Harness::new(&["a"]);
    h.add_tag(io_tag("a.t", "a"));
    h.script.fail_read.store(true, Ordering::SeqCst);

    h.supervisor.reconcile().await.expect("reconcile");
    assert!(h.is_online("a").await);

    advance(600).await;
    assert!(!h.supervisor.is_connected("a"));
    assert!(!h.is_online("a").await);
    assert_eq!(h.script.closes.load(Ordering::SeqCst), 1);

    h.script.fail_read.store(false, Ordering::SeqCst);
    h.supervisor.reconcile().await.expect("reconcile");
    assert!(h.supervisor.is_connected("a"));
    assert!(h.is_online("a").await);
    assert_eq!(h.script.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn write_error_tears_down_wire() {
    let h = Harness::new(&["a"]);
    h.script.fail_write.store(true, Ordering::SeqCst);
    h.supervisor.reconcile().await.expect("reconcile");

    let batch = vec![io_tag("a.t", "a").with_value(TagValue::F32(1.0))];
    h.supervisor.write(batch).await.expect("queued");
    advance(10).await;

    assert!(!h.supervisor.is_connected("a"));
    assert!(!h.is_online("a").await);
}

#[tokio::test(start_paused = true)]
async fn invalid_batches_are_rejected_without_io() {
    let h = Harness::new(&["a", "b"]);
    h.supervisor.reconcile().await.expect("reconcile");

    let mixed = vec![
        io_tag("a.t", "a").with_value(TagValue::F32(1.0)),
        io_tag("b.t", "b").with_value(TagValue::F32(1.0)),
    ];
    let err = h.supervisor.write(mixed).await.expect_err("mixed");
    assert!(matches!(err, CollectError::MixedSlots(..)));

    let read_only = Tag::new("a.ro", "a", TagKind::Io, DataType::F32, AccessMode::ReadOnly, "3:1")
        .with_value(TagValue::F32(1.0));
    let err = h.supervisor.write(vec![read_only]).await.expect_err("read-only");
    assert!(matches!(err, CollectError::ReadOnlyTag(id) if id == "a.ro"));

    let err = h.supervisor.write(vec![io_tag("a.t", "a")]).await.expect_err("empty");
    assert!(matches!(err, CollectError::EmptyValue(_)));

    h.supervisor.write(Vec::new()).await.expect("empty batch");

    advance(100).await;
    assert!(h.script.written().is_empty());
}

#[tokio::test(start_paused = true)]
async fn write_checks_slot_state() {
    let h = Harness::new(&["a"]);
    let batch = || vec![io_tag("a.t", "a").with_value(TagValue::F32(1.0))];

    let err = h.supervisor.write(batch()).await.expect_err("not connected");
    assert!(matches!(err, CollectError::NotConnected(_)));

    h.registry.set_slot_enabled("a", false).expect("disable");
    let err = h.supervisor.write(batch()).await.expect_err("disabled");
    assert!(matches!(err, CollectError::SlotDisabled(_)));

    let ghost = vec![io_tag("g.t", "ghost").with_value(TagValue::F32(1.0))];
    let err = h.supervisor.write(ghost).await.expect_err("unknown");
    assert!(matches!(err, CollectError::SlotNotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn not_connected_write_has_no_side_effects() {
    let h = Harness::new(&["a"]);
    let memory = Tag::new("a.m", "a", TagKind::Mem, DataType::I32, AccessMode::ReadWrite, "")
        .with_value(TagValue::I32(3));
    let batch = vec![memory, io_tag("a.t", "a").with_value(TagValue::F32(1.0))];

    let err = h.supervisor.write(batch).await.expect_err("not connected");
    assert!(matches!(err, CollectError::NotConnected(_)));
    assert!(h.cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn memory_tags_are_written_to_cache_directly() {
    let h = Harness::new(&["a"]);
    let memory = Tag::new("a.m", "a", TagKind::Mem, DataType::I32, AccessMode::ReadWrite, "")
        .with_value(TagValue::I32(3));

    h.supervisor.write(vec![memory]).await.expect("write");
    let entry = h.cache.get("a.m").expect("get").expect("entry");
    assert_eq!(entry.value, TagValue::I32(3));
    assert_eq!(h.script.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn writes_reach_driver_in_order_as_raw_values() {
    let h = Harness::new(&["a"]);
    h.supervisor.reconcile().await.expect("reconcile");

    for eng in [1.0f32, 5.0, 10.0] {
        let batch = vec![scaled_tag("a.t", "a").with_value(TagValue::F32(eng))];
        h.supervisor.write(batch).await.expect("write");
    }
    advance(50).await;

    let raw: Vec<Option<TagValue>> = h
        .script
        .written()
        .into_iter()
        .map(|batch| batch[0].value.clone())
        .collect();
    assert_eq!(
        raw,
        vec![
            Some(TagValue::F32(10.0)),
            Some(TagValue::F32(50.0)),
            Some(TagValue::F32(100.0)),
        ]
    );
    let entry = h.cache.get("a.t").expect("get").expect("entry");
    assert_eq!(entry.value, TagValue::F32(10.0));
}

#[tokio::test(start_paused = true)]
async fn driver_io_is_never_concurrent() {
    let h = Harness::new(&["a"]);
    h.add_tag(io_tag("a.t", "a"));
    h.script.io_delay_ms.store(50, Ordering::SeqCst);
    h.supervisor.reconcile().await.expect("reconcile");

    for step in 0..8 {
        let batch = vec![io_tag("a.t", "a").with_value(TagValue::F32(step as f32))];
        h.supervisor.write(batch).await.expect("write");
        advance(130).await;
    }

    assert!(h.script.reads.load(Ordering::SeqCst) > 0);
    assert_eq!(h.script.written().len(), 8);
    assert_eq!(h.script.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn slot_without_io_tags_idles_out() {
    let h = Harness::new(&["a"]);
    h.supervisor.reconcile().await.expect("reconcile");

    advance(4_000).await;
    assert!(h.supervisor.is_connected("a"));

    advance(2_000).await;
    assert!(!h.supervisor.is_connected("a"));
    assert!(!h.is_online("a").await);
    assert_eq!(h.script.reads.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn polling_wire_stays_connected() {
    let h = Harness::new(&["a"]);
    h.add_tag(io_tag("a.t", "a"));
    h.supervisor.reconcile().await.expect("reconcile");

    advance(8_000).await;
    assert!(h.supervisor.is_connected("a"));
    assert!(h.script.reads.load(Ordering::SeqCst) >= 10);
}

#[tokio::test(start_paused = true)]
async fn reset_is_idempotent() {
    let h = Harness::new(&["a"]);
    h.add_tag(io_tag("a.t", "a"));
    h.supervisor.reconcile().await.expect("reconcile");

    h.supervisor.reset("a").await;
    h.supervisor.reset("a").await;
    h.supervisor.reset("never-connected").await;
    advance(10).await;

    assert!(!h.supervisor.is_connected("a"));
    assert!(!h.is_online("a").await);
    assert_eq!(h.script.closes.load(Ordering::SeqCst), 1);

    h.supervisor.reconcile().await.expect("reconcile");
    assert!(h.supervisor.is_connected("a"));
    assert!(h.is_online("a").await);
}

#[tokio::test(start_paused = true)]
async fn reset_during_connect_discards_new_driver() {
    let h = Harness::new(&["a"]);
    h.script.connect_delay_ms.store(100, Ordering::SeqCst);

    let supervisor = h.supervisor.clone();
    let pass = tokio::spawn(async move { supervisor.reconcile().await });
    advance(10).await;
    h.supervisor.reset("a").await;
    pass.await.expect("join").expect("reconcile");

    assert!(!h.supervisor.is_connected("a"));
    assert!(!h.is_online("a").await);
    assert_eq!(h.script.connects.load(Ordering::SeqCst), 1);
    assert_eq!(h.script.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_every_wire() {
    let h = Harness::new(&["a", "b"]);
    h.supervisor.reconcile().await.expect("reconcile");
    assert_eq!(h.supervisor.connected_slots().len(), 2);

    h.supervisor.shutdown().await;
    assert!(h.supervisor.connected_slots().is_empty());
    assert!(!h.is_online("a").await);
    assert!(!h.is_online("b").await);
    assert_eq!(h.script.closes.load(Ordering::SeqCst), 2);

    h.supervisor.reconcile().await.expect("reconcile");
    assert_eq!(h.script.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn start_clears_stale_links_and_reconciles() {
    let h = Harness::new(&["a"]);
    h.registry
        .upsert_slot(Slot::new("stale", "MISSING", ""))
        .expect("slot");
    h.registry.mark_online("stale").await.expect("online");

    let task = h.supervisor.start();
    advance(100).await;
    assert!(h.supervisor.is_connected("a"));
    assert!(h.is_online("a").await);
    assert!(!h.is_online("stale").await);

    h.supervisor.shutdown().await;
    task.await.expect("join");
    assert!(!h.is_online("a").await);
}

#[tokio::test(start_paused = true)]
async fn failing_wire_leaves_other_slots_running() {
    let h = Harness::new(&["a", "b"]);
    h.add_tag(io_tag("a.t", "a"));
    h.add_tag(io_tag("b.t", "b"));
    h.script.set_read_value(TagValue::F32(1.0));
    h.script.fail_reads_for("a");
    h.supervisor.reconcile().await.expect("reconcile");

    advance(600).await;
    assert!(!h.supervisor.is_connected("a"));
    assert!(!h.is_online("a").await);
    assert!(h.supervisor.is_connected("b"));
    assert!(h.is_online("b").await);
    let entry = h.cache.get("b.t").expect("get").expect("entry");
    assert_eq!(entry.value, TagValue::F32(1.0));
    let reads_before = h.script.reads_by("b");

    h.script.set_read_value(TagValue::F32(2.0));
    advance(1_100).await;
    assert!(h.script.reads_by("b") > reads_before);
    let entry = h.cache.get("b.t").expect("get").expect("entry");
    assert_eq!(entry.value, TagValue::F32(2.0));

    let batch = vec![io_tag("b.t", "b").with_value(TagValue::F32(7.0))];
    h.supervisor.write(batch).await.expect("write");
    advance(10).await;
    assert_eq!(h.script.written_by("b").len(), 1);
    assert!(h.script.written_by("a").is_empty());
    assert!(h.supervisor.is_connected("b"));
}

#[tokio::test(start_paused = true)]
async fn keepalive_shorter_than_poll_interval_is_raised() {
    let mut options = options();
    options.read_interval = Duration::from_secs(2);
    options.keepalive = Duration::from_secs(1);
    let h = Harness::with_options(&["a"], options);
    let mut slot = Slot::new("b", FAKE, "b");
    slot.keepalive_ms = Some(100);
    h.registry.upsert_slot(slot).expect("slot");
    h.add_tag(io_tag("a.t", "a"));
    h.add_tag(io_tag("b.t", "b"));

    h.supervisor.reconcile().await.expect("reconcile");
    advance(6_000).await;

    assert_eq!(h.supervisor.connected_slots(), vec!["a", "b"]);
    assert!(h.script.reads_by("a") >= 2);
    assert!(h.script.reads_by("b") >= 2);
    assert_eq!(h.script.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_connect_does_not_hold_back_other_slots() {
    let h = Harness::new(&["a", "b", "c"]);
    h.script.connect_delay_ms.store(10_000, Ordering::SeqCst);

    let started = tokio::time::Instant::now();
    h.supervisor.reconcile().await.expect("reconcile");

    assert!(started.elapsed() < Duration::from_secs(11));
    assert_eq!(h.supervisor.connected_slots(), vec!["a", "b", "c"]);
    assert_eq!(h.script.connects.load(Ordering::SeqCst), 3);
}
