use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use upscaler_inference::pipeline::{
    decode_image, encode_png, from_planar_tensor, to_planar_tensor, PixelGrid,
};

fn random_grid(size: usize) -> PixelGrid {
    let mut data = vec![0u8; size * size * 3];
    rand::thread_rng().fill(&mut data[..]);
    PixelGrid::new(size, size, data).unwrap()
}

fn bench_tensor_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("tensor_conversion");

    for size in [64, 256, 512] {
        let grid = random_grid(size);
        let tensor = to_planar_tensor(&grid);
        group.throughput(Throughput::Elements((size * size) as u64));

        group.bench_with_input(BenchmarkId::new("to_planar", size), &grid, |b, grid| {
            b.iter(|| black_box(to_planar_tensor(black_box(grid))));
        });

        group.bench_with_input(BenchmarkId::new("from_planar", size), &tensor, |b, tensor| {
            b.iter(|| black_box(from_planar_tensor(black_box(tensor)).unwrap()));
        });
    }

    group.finish();
}

fn bench_png_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("png_codec");

    for size in [64, 256] {
        let grid = random_grid(size);
        let png = encode_png(&grid).unwrap();

        group.bench_with_input(BenchmarkId::new("encode", size), &grid, |b, grid| {
            b.iter(|| black_box(encode_png(black_box(grid)).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("decode", size), &png, |b, png| {
            b.iter(|| black_box(decode_image(black_box(png)).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tensor_conversion, bench_png_codec);
criterion_main!(benches);
