//! Stroke tessellation benchmarks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use paintcore::stroke::{StrokeGeometryBuilder, StrokePath, StrokeSample};
use paintcore::BrushConfig;

fn generate_stroke(count: usize) -> StrokePath {
    StrokePath::from_samples(
        (0..count)
            .map(|i| {
                let t = i as f32 / count as f32;
                let mut s = StrokeSample::new(
                    t * 1000.0,
                    (t * std::f32::consts::PI * 4.0).sin() * 100.0 + 500.0,
                    0.3 + t * 0.4,
                    i as f64 * 8.0,
                );
                s.tilt_x = 0.2;
                s
            })
            .collect(),
    )
}

fn benchmark_tessellation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Stroke Tessellation");

    for count in [10, 50, 100, 500, 1000].iter() {
        let path = generate_stroke(*count);
        let mut builder = StrokeGeometryBuilder::new(BrushConfig::default());

        group.bench_with_input(BenchmarkId::new("build", count), &path, |b, path| {
            b.iter(|| builder.build(path))
        });
    }

    group.finish();
}

fn benchmark_brush_width(c: &mut Criterion) {
    let mut group = c.benchmark_group("Brush Width Impact");

    let path = generate_stroke(200);

    // Wide brush: long segment cap, fewer resampled points.
    let mut wide = StrokeGeometryBuilder::new(
        BrushConfig {
            base_diameter: 64.0,
            ..Default::default()
        }
        .validated()
        .expect("wide config"),
    );
    group.bench_function("wide_64px", |b| b.iter(|| wide.build(&path)));

    // Narrow brush: dense resampling dominates.
    let mut narrow = StrokeGeometryBuilder::new(
        BrushConfig {
            base_diameter: 2.0,
            ..Default::default()
        }
        .validated()
        .expect("narrow config"),
    );
    group.bench_function("narrow_2px", |b| b.iter(|| narrow.build(&path)));

    group.finish();
}

criterion_group!(benches, benchmark_tessellation, benchmark_brush_width);
criterion_main!(benches);
