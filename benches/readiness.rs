//! Readiness Detection Benchmarks
//!
//! Measures the per-observation cost of log-quiescence detection and the
//! tail read that feeds it. Both sit on the display-server startup path and
//! run on a 50ms poll, so they must stay far below that budget.

use std::io::Write;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use limen::display::readiness::{tail_line, ReadinessDetector};

const FOREVER: Duration = Duration::from_secs(3600);

/// Typical X server log lines, from short probe notices to module loads.
fn sample_lines() -> Vec<String> {
    (0..64)
        .map(|i| {
            format!(
                "(II) modeset({}): EDID vendor \"ACME\", prod id {}",
                i % 4,
                1000 + i
            )
        })
        .collect()
}

/// Benchmark a settled log: every observation repeats the same line.
fn bench_observe_steady(c: &mut Criterion) {
    let mut group = c.benchmark_group("readiness_observe");

    group.bench_function("identical_line", |b| {
        let line = "(II) GLX: Initialized DRI2 GL provider for screen 0";
        let mut detector = ReadinessDetector::new(u32::MAX, FOREVER);

        b.iter(|| black_box(detector.observe(black_box(Some(line)), Duration::ZERO)))
    });

    group.bench_function("changing_lines", |b| {
        let lines = sample_lines();
        let mut detector = ReadinessDetector::new(u32::MAX, FOREVER);
        let mut i = 0usize;

        b.iter(|| {
            i = (i + 1) % lines.len();
            black_box(detector.observe(black_box(Some(&lines[i])), Duration::ZERO))
        })
    });

    group.bench_function("skipped_observation", |b| {
        let mut detector = ReadinessDetector::new(u32::MAX, FOREVER);

        b.iter(|| black_box(detector.observe(black_box(None), Duration::ZERO)))
    });

    group.finish();
}

/// Benchmark the bounded tail read across log sizes.
///
/// The read is capped at the final 8 KiB, so cost should flatten once the
/// log outgrows the window.
fn bench_tail_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("readiness_tail_line");

    let sizes = [(4u64, "4KiB"), (64, "64KiB"), (1024, "1MiB")];

    for (kib, name) in sizes {
        let mut file = tempfile::NamedTempFile::new().expect("create temp log");
        let line = "(II) event3  - Power Button: device is a keyboard";
        let mut written = 0u64;
        while written < kib * 1024 {
            writeln!(file, "{}", line).expect("write temp log");
            written += line.len() as u64 + 1;
        }
        file.flush().expect("flush temp log");

        group.throughput(Throughput::Bytes(8192.min(written)));

        group.bench_with_input(BenchmarkId::new("log_size", name), file.path(), |b, path| {
            b.iter(|| black_box(tail_line(black_box(path))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_observe_steady, bench_tail_line);
criterion_main!(benches);
