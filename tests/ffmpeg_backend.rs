//! FFmpeg backend integration tests.
//!
//! Tests that need real media skip themselves when the fixtures are absent.
//! Generate them with:
//!
//! ```text
//! ffmpeg -f lavfi -i testsrc=duration=10:size=640x480:rate=30 -g 30 tests/fixtures/sample_video.mp4
//! ffmpeg -f lavfi -i sine=duration=5 tests/fixtures/sample_audio_only.mp4
//! ```

use std::{path::Path, sync::Arc};

use ffmpeg_next::format::Pixel;

use stillframe::{
    CancellationToken, DecodedFrame, DemuxContainer, ErrorKind, ExtractOptions,
    ExtractionRequest, FfmpegBackend, FfmpegLogLevel, ImageSurface, LogicalSize,
    ResourceLedger, SeekPrecision, SeekStrategy, ThumbnailExtractor, pipeline,
};

const SAMPLE_VIDEO: &str = "tests/fixtures/sample_video.mp4";
const SAMPLE_AUDIO_ONLY: &str = "tests/fixtures/sample_audio_only.mp4";

fn quiet() {
    stillframe::set_ffmpeg_log_level(FfmpegLogLevel::Error);
}

#[tokio::test]
async fn nonexistent_file_is_open_failed() {
    quiet();
    let extractor = ThumbnailExtractor::new(ExtractOptions::new());
    let request = ExtractionRequest::new(
        "this_file_does_not_exist.mp4",
        LogicalSize::new(64.0, 64.0),
        1.0,
    );

    let error = extractor.extract(request).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::OpenFailed);
    assert_eq!(extractor.resources().outstanding(), 0);
}

#[tokio::test]
async fn garbage_file_is_open_failed() {
    quiet();
    let temporary_directory = tempfile::tempdir().expect("Failed to create temp dir");
    let invalid_file_path = temporary_directory.path().join("invalid.mp4");
    std::fs::write(&invalid_file_path, b"this is not a media file")
        .expect("Failed to write invalid file");

    let extractor = ThumbnailExtractor::new(ExtractOptions::new());
    let request = ExtractionRequest::new(&invalid_file_path, LogicalSize::new(64.0, 64.0), 1.0);

    let error = extractor.extract(request).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::OpenFailed, "{error}");
    assert_eq!(extractor.resources().outstanding(), 0);
    assert_eq!(extractor.gate().stats().active_slots, 0);
}

#[tokio::test]
async fn sample_video_thumbnail() {
    if !Path::new(SAMPLE_VIDEO).exists() {
        return;
    }
    quiet();

    let extractor = ThumbnailExtractor::new(ExtractOptions::new());
    let request = ExtractionRequest::new(SAMPLE_VIDEO, LogicalSize::new(128.0, 128.0), 2.0);
    let reply = extractor.extract(request).await.expect("Failed to extract thumbnail");

    assert_eq!(reply.pixel_size(), (256, 192));
    assert_eq!(reply.logical_size(), LogicalSize::new(128.0, 96.0));

    let mut surface = ImageSurface::for_reply(&reply, 2.0);
    reply.draw(&mut surface).expect("Failed to draw thumbnail");
    assert_eq!(surface.image().dimensions(), (256, 192));
    assert_eq!(extractor.resources().outstanding(), 0);
}

#[tokio::test]
async fn sample_video_is_deterministic() {
    if !Path::new(SAMPLE_VIDEO).exists() {
        return;
    }
    quiet();

    let extractor = ThumbnailExtractor::new(ExtractOptions::new());
    let request = ExtractionRequest::new(SAMPLE_VIDEO, LogicalSize::new(64.0, 64.0), 1.0);
    let first = extractor.extract(request.clone()).await.unwrap();
    let second = extractor.extract(request).await.unwrap();
    assert_eq!(first.frame().unwrap().pixels(), second.frame().unwrap().pixels());
}

#[test]
fn sample_video_seeks_to_the_quarter_mark() {
    if !Path::new(SAMPLE_VIDEO).exists() {
        return;
    }
    quiet();

    let backend = FfmpegBackend::new();
    let ledger = Arc::new(ResourceLedger::new());
    let path = Path::new(SAMPLE_VIDEO);

    let mut container = pipeline::open(&backend, path, &ledger).unwrap();
    let stream = pipeline::select_video_stream(&backend, &container, path).unwrap();
    assert_eq!((stream.width, stream.height), (640, 480));
    assert_ne!(stream.pixel_format, Pixel::None);
    let mut decoder = pipeline::open_decoder(&backend, &container, &stream, &ledger).unwrap();

    let strategy = SeekStrategy::default();
    let target = strategy.target_timestamp(&stream, container.duration());
    strategy
        .seek(&mut *container, &mut *decoder, &stream, target)
        .unwrap();

    let frame = pipeline::decode_nearest(
        &mut *container,
        &mut *decoder,
        &stream,
        target,
        SeekPrecision::Accurate,
        &ledger,
        &CancellationToken::new(),
    )
    .unwrap();
    let pts = frame.pts().expect("decoded frame should carry a pts");
    assert!(pts >= target, "pts {pts} before target {target}");
}

#[tokio::test]
async fn audio_only_file_has_no_video_stream() {
    if !Path::new(SAMPLE_AUDIO_ONLY).exists() {
        return;
    }
    quiet();

    let extractor = ThumbnailExtractor::new(ExtractOptions::new());
    let request = ExtractionRequest::new(SAMPLE_AUDIO_ONLY, LogicalSize::new(64.0, 64.0), 1.0);
    let error = extractor.extract(request).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NoVideoStream);
    assert_eq!(extractor.resources().outstanding(), 0);
}
