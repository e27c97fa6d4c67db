//! Benchmarks for admission, scaling, and full extractions.
//!
//! Run with: cargo bench
//!
//! The FFmpeg benchmark requires `tests/fixtures/sample_video.mp4`; the rest
//! run on the synthetic backend.

use std::{hint::black_box, path::Path, sync::Arc, time::Duration};

use criterion::Criterion;
use stillframe::{
    AdmissionGate, ExtractOptions, ExtractionRequest, FfmpegLogLevel, GateOptions, LogicalSize,
    SeekPrecision, SyntheticBackend, SyntheticMedia, ThumbnailExtractor,
    scaler::{DEFAULT_MAX_OUTPUT_PIXELS, premultiply_pixel, target_dimensions},
};
use tokio::runtime::Runtime;

const SAMPLE_VIDEO: &str = "tests/fixtures/sample_video.mp4";

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn synthetic_extractor(
    precision: SeekPrecision,
    slots: u32,
) -> ThumbnailExtractor<SyntheticBackend> {
    let mut backend = SyntheticBackend::new();
    for index in 0..8 {
        backend = backend.with_media(
            format!("clip-{index}.mov"),
            SyntheticMedia::video(1920, 1080, Duration::from_secs(60)),
        );
    }
    let options = ExtractOptions::new()
        .with_seek_precision(precision)
        .with_gate(GateOptions::new().with_max_concurrent_slots(slots));
    ThumbnailExtractor::with_backend(backend, options)
}

fn benchmark_scaling_math(criterion: &mut Criterion) {
    criterion.bench_function("target dimensions", |bencher| {
        bencher.iter(|| {
            target_dimensions(
                black_box(1920),
                black_box(1080),
                LogicalSize::new(128.0, 128.0),
                black_box(2.0),
                DEFAULT_MAX_OUTPUT_PIXELS,
            )
        });
    });

    criterion.bench_function("premultiply 256x144 frame", |bencher| {
        let pixels = vec![[200_u8, 100, 50, 128]; 256 * 144];
        bencher.iter(|| {
            pixels
                .iter()
                .map(|pixel| premultiply_pixel(*pixel))
                .fold(0_u64, |sum, [red, ..]| sum + u64::from(red))
        });
    });
}

fn benchmark_admission(criterion: &mut Criterion) {
    let runtime = runtime();
    let gate = AdmissionGate::new(GateOptions::new().with_max_concurrent_slots(4));

    criterion.bench_function("gate acquire/release (uncontended)", |bencher| {
        bencher.iter(|| {
            runtime.block_on(async {
                let slot = gate.acquire(1).await.unwrap();
                AdmissionGate::release(slot);
            });
        });
    });
}

fn benchmark_synthetic_extraction(criterion: &mut Criterion) {
    let runtime = runtime();

    let keyframe = synthetic_extractor(SeekPrecision::Keyframe, 2);
    criterion.bench_function("synthetic extract 1080p (keyframe)", |bencher| {
        bencher.iter(|| {
            runtime.block_on(async {
                let request =
                    ExtractionRequest::new("clip-0.mov", LogicalSize::new(128.0, 128.0), 2.0);
                keyframe.extract(request).await.unwrap()
            })
        });
    });

    let accurate = synthetic_extractor(SeekPrecision::Accurate, 2);
    criterion.bench_function("synthetic extract 1080p (accurate)", |bencher| {
        bencher.iter(|| {
            runtime.block_on(async {
                let request =
                    ExtractionRequest::new("clip-0.mov", LogicalSize::new(128.0, 128.0), 2.0);
                accurate.extract(request).await.unwrap()
            })
        });
    });

    let contended = Arc::new(synthetic_extractor(SeekPrecision::Keyframe, 2));
    criterion.bench_function("synthetic extract 8 concurrent (2 slots)", |bencher| {
        bencher.iter(|| {
            runtime.block_on(async {
                let handles: Vec<_> = (0..8)
                    .map(|index| {
                        let extractor = Arc::clone(&contended);
                        tokio::spawn(async move {
                            let request = ExtractionRequest::new(
                                format!("clip-{index}.mov"),
                                LogicalSize::new(64.0, 64.0),
                                1.0,
                            );
                            extractor.extract(request).await.is_ok()
                        })
                    })
                    .collect();
                for handle in handles {
                    assert!(handle.await.unwrap());
                }
            });
        });
    });
}

fn benchmark_ffmpeg_extraction(criterion: &mut Criterion) {
    stillframe::set_ffmpeg_log_level(FfmpegLogLevel::Error);

    if !Path::new(SAMPLE_VIDEO).exists() {
        eprintln!("Skipping benchmark: fixture not found");
        return;
    }

    let runtime = runtime();
    let extractor = ThumbnailExtractor::new(ExtractOptions::new());
    criterion.bench_function("ffmpeg extract thumbnail", |bencher| {
        bencher.iter(|| {
            runtime.block_on(async {
                let request =
                    ExtractionRequest::new(SAMPLE_VIDEO, LogicalSize::new(128.0, 128.0), 2.0);
                extractor.extract(request).await.unwrap()
            })
        });
    });
}

criterion::criterion_group!(
    benches,
    benchmark_scaling_math,
    benchmark_admission,
    benchmark_synthetic_extraction,
    benchmark_ffmpeg_extraction,
);
criterion::criterion_main!(benches);
