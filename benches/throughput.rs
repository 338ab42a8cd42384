use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use porter::{Config, Consumer, Producer};

const ITEMS: usize = 10_000;
const ITEM_SIZE: usize = 64;

fn transfer(config: &Config) -> usize {
    let (mut producer, mut consumer) = config.build().unwrap();
    let writer = thread::spawn(move || {
        let item = [0x11u8; ITEM_SIZE];
        for _ in 0..ITEMS {
            producer.write(&item).unwrap();
        }
    });

    let mut sum = 0;
    for _ in 0..ITEMS {
        sum += consumer.read().unwrap().len();
        consumer.consume().unwrap();
    }
    writer.join().unwrap();
    sum
}

fn bench_single_thread(c: &mut Criterion) {
    let (mut producer, mut consumer) = porter::ring::channel(1 << 16).unwrap();
    c.bench_function("ring_roundtrip_64b", |b| {
        b.iter(|| {
            producer.write(&[0x22; ITEM_SIZE]).unwrap();
            black_box(consumer.read().unwrap());
            consumer.consume().unwrap();
        })
    });

    let (mut producer, mut consumer) = porter::heap::channel(1 << 16);
    c.bench_function("heap_roundtrip_64b", |b| {
        b.iter(|| {
            producer.write(&[0x22; ITEM_SIZE]).unwrap();
            black_box(consumer.read().unwrap());
            consumer.consume().unwrap();
        })
    });
}

fn bench_two_threads(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc_transfer");
    group.throughput(Throughput::Bytes((ITEMS * ITEM_SIZE) as u64));
    for config in [Config::arena(1 << 12), Config::heap(1 << 12)].iter() {
        let name = format!("{:?}", config.storage).to_lowercase();
        group.bench_function(name, |b| b.iter(|| black_box(transfer(config))));
    }
    group.finish();
}

criterion_group!(benches, bench_single_thread, bench_two_threads);
criterion_main!(benches);
