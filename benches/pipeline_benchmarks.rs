//! Pipeline overhead around inference, measured with the mock backend

use bgremove_server::{
    BackgroundRemovalProcessor, BackgroundRemover, ImageIOService, MockBackend, OutputFormatHandler,
    RemovalConfig, ResizePolicy,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use tokio::runtime::Runtime;

const SIZES: [(u32, u32); 3] = [(320, 240), (1024, 768), (2048, 1536)];

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    }))
}

fn jpeg(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg).unwrap();
    bytes
}

fn processor(resize: ResizePolicy) -> BackgroundRemovalProcessor {
    let config = RemovalConfig::builder().resize(resize).build().unwrap();
    let mut processor = BackgroundRemovalProcessor::from_backend(config, Box::new(MockBackend::new())).unwrap();
    processor.initialize().unwrap();
    processor
}

fn bench_process_image(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_image");
    group.sample_size(20);

    for resize in [ResizePolicy::Static, ResizePolicy::Dynamic] {
        let mut processor = processor(resize);
        for (width, height) in SIZES {
            let image = gradient(width, height);
            group.bench_with_input(
                BenchmarkId::new(format!("{resize:?}"), format!("{width}x{height}")),
                &image,
                |b, image| b.iter(|| processor.process_image(black_box(image)).unwrap()),
            );
        }
    }

    group.finish();
}

fn bench_codecs(c: &mut Criterion) {
    let mut group = c.benchmark_group("codecs");
    group.sample_size(20);

    for (width, height) in SIZES {
        let image = gradient(width, height);
        let encoded = jpeg(&image);
        let rgba = DynamicImage::ImageRgba8(image.to_rgba8());

        group.bench_with_input(
            BenchmarkId::new("decode_jpeg", format!("{width}x{height}")),
            &encoded,
            |b, bytes| b.iter(|| ImageIOService::decode_bytes(black_box(bytes)).unwrap()),
        );
        group.bench_with_input(
            BenchmarkId::new("encode_png", format!("{width}x{height}")),
            &rgba,
            |b, image| b.iter(|| OutputFormatHandler::encode_png(black_box(image)).unwrap()),
        );
    }

    group.finish();
}

fn bench_remove_background(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let remover = BackgroundRemover::from_processor(processor(ResizePolicy::Static)).unwrap();
    let upload = jpeg(&gradient(1024, 768));

    let mut group = c.benchmark_group("remove_background");
    group.sample_size(10);
    group.bench_function("jpeg_1024x768", |b| {
        b.iter(|| rt.block_on(remover.remove_background(black_box(upload.clone()))).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_process_image, bench_codecs, bench_remove_background);
criterion_main!(benches);
