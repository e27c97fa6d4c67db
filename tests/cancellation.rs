//! Cancellation integration tests.

use std::{sync::Arc, time::Duration};

use stillframe::{
    CancellationToken, ExtractOptions, ExtractionRequest, GateOptions, LogicalSize,
    SeekPrecision, SyntheticBackend, SyntheticCounters, SyntheticMedia, ThumbnailError,
    ThumbnailExtractor,
};

const CLIP: &str = "clip.mov";

/// A clip whose decode takes well over 100 ms: one keyframe for the whole
/// stream and a slow decoder, extracted with accurate seeking.
fn slow_extractor() -> (Arc<ThumbnailExtractor<SyntheticBackend>>, Arc<SyntheticCounters>) {
    let media = SyntheticMedia::video(320, 240, Duration::from_secs(10))
        .with_keyframe_interval(250)
        .with_decode_delay(Duration::from_millis(2));
    let backend = SyntheticBackend::new().with_media(CLIP, media);
    let counters = Arc::clone(backend.counters());
    let options = ExtractOptions::new()
        .with_seek_precision(SeekPrecision::Accurate)
        .with_gate(
            GateOptions::new()
                .with_max_concurrent_slots(1)
                .with_queue_timeout(Duration::from_secs(30)),
        );
    (
        Arc::new(ThumbnailExtractor::with_backend(backend, options)),
        counters,
    )
}

fn request() -> ExtractionRequest {
    ExtractionRequest::new(CLIP, LogicalSize::new(32.0, 32.0), 1.0)
}

async fn wait_for_idle_gate(extractor: &ThumbnailExtractor<SyntheticBackend>) {
    for _ in 0..400 {
        if extractor.gate().stats().active_slots == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("slot was never released");
}

#[tokio::test]
async fn cancelled_before_admission_opens_nothing() {
    let (extractor, counters) = slow_extractor();
    let token = CancellationToken::new();
    token.cancel();

    let result = extractor.extract_with_cancellation(request(), token).await;
    assert!(matches!(result, Err(ThumbnailError::Cancelled)));
    assert_eq!(extractor.gate().stats().granted, 0);
    assert_eq!(counters.snapshot().containers_opened, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_a_queued_request_leaves_the_queue() {
    let (extractor, counters) = slow_extractor();
    let held = extractor.gate().try_acquire(1).unwrap();

    let token = CancellationToken::new();
    let queued = tokio::spawn({
        let extractor = Arc::clone(&extractor);
        let token = token.clone();
        async move { extractor.extract_with_cancellation(request(), token).await }
    });
    while extractor.gate().stats().queued == 0 {
        tokio::task::yield_now().await;
    }

    token.cancel();
    let result = queued.await.unwrap();
    assert!(matches!(result, Err(ThumbnailError::Cancelled)));
    assert_eq!(extractor.gate().stats().queued, 0);
    assert_eq!(counters.snapshot().containers_opened, 0);
    drop(held);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_mid_decode_releases_everything() {
    let (extractor, counters) = slow_extractor();
    let token = CancellationToken::new();

    let running = tokio::spawn({
        let extractor = Arc::clone(&extractor);
        let token = token.clone();
        async move { extractor.extract_with_cancellation(request(), token).await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    token.cancel();

    let result = running.await.unwrap();
    assert!(matches!(result, Err(ThumbnailError::Cancelled)), "{result:?}");
    assert!(result.unwrap_err().kind().is_retryable());
    assert_eq!(extractor.gate().stats().active_slots, 0);
    assert_eq!(extractor.resources().outstanding(), 0);
    let snapshot = counters.snapshot();
    assert_eq!(snapshot.containers_opened, 1);
    assert!(snapshot.is_balanced(), "{snapshot:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_the_future_stops_the_pipeline() {
    let (extractor, counters) = slow_extractor();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(30), extractor.extract(request())).await;
    assert!(abandoned.is_err(), "extraction should still be running");

    wait_for_idle_gate(&extractor).await;
    assert_eq!(extractor.resources().outstanding(), 0);
    assert!(counters.snapshot().is_balanced());

    // The gate is usable again.
    let reply = extractor.extract(request()).await.unwrap();
    assert_eq!(reply.pixel_size(), (32, 24));
}
