//! Verifies the invalidation paths emit their metric keys.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use metrics_util::debugging::{DebuggingRecorder, Snapshotter};
use scopa::{ElementMutation, Invalidator, MemoryTagIndex, PurgeSettings, Tag};
use serial_test::serial;

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        snapshotter
    })
}

fn metric_names() -> HashSet<String> {
    snapshotter()
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(key, _, _, _)| key.key().name().to_string())
        .collect()
}

#[tokio::test]
#[serial]
async fn purge_path_emits_counter_and_latency_metrics() {
    let _ = snapshotter();
    let invalidator = Invalidator::from_settings(
        &PurgeSettings::default(),
        Arc::new(MemoryTagIndex::new()),
    );

    invalidator
        .handle_mutation(&ElementMutation::save("42").in_section("7"))
        .await;

    let names = metric_names();
    assert!(names.contains("scopa_purge_tag_total"));
    assert!(names.contains("scopa_purge_fail_total"));
    assert!(names.contains("scopa_purge_ms"));
}

#[tokio::test]
#[serial]
async fn index_record_path_emits_record_metrics() {
    let _ = snapshotter();
    let settings = PurgeSettings {
        fallback_local_index: true,
        ..PurgeSettings::default()
    };
    let invalidator = Invalidator::from_settings(&settings, Arc::new(MemoryTagIndex::new()));

    let tags = [Tag::element("42").expect("tag")].into_iter().collect();
    invalidator.finalize("/blog/post-42", &tags).await;

    let names = metric_names();
    assert!(names.contains("scopa_index_record_total"));
}
