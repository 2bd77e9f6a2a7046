//! Benchmarks for key agreement and the envelope cipher.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use murmur_core::crypto::{
    compute_from_ephemeral, derive_ephemeral, generate_key_pair, open, seal, SystemRandom,
};

fn bench_key_agreement(c: &mut Criterion) {
    let rng = SystemRandom;
    let recipient = generate_key_pair(&rng);

    c.bench_function("dh/generate_key_pair", |b| {
        b.iter(|| generate_key_pair(black_box(&rng)))
    });

    c.bench_function("dh/derive_ephemeral", |b| {
        b.iter(|| derive_ephemeral(black_box(&recipient.public), &rng).unwrap())
    });

    let exchange = derive_ephemeral(&recipient.public, &rng).unwrap();
    c.bench_function("dh/compute_from_ephemeral", |b| {
        b.iter(|| {
            compute_from_ephemeral(black_box(&recipient.private), &exchange.ephemeral_public)
                .unwrap()
        })
    });
}

fn bench_cipher(c: &mut Criterion) {
    let rng = SystemRandom;
    let recipient = generate_key_pair(&rng);
    let exchange = derive_ephemeral(&recipient.public, &rng).unwrap();

    let mut group = c.benchmark_group("cipher");
    for size in [64usize, 1024, 16 * 1024] {
        let plaintext = vec![0x42u8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("seal", size), &plaintext, |b, data| {
            b.iter(|| {
                seal(
                    &exchange.shared_secret,
                    black_box(data),
                    &exchange.ephemeral_public,
                    &rng,
                )
                .unwrap()
            })
        });

        let sealed = seal(
            &exchange.shared_secret,
            &plaintext,
            &exchange.ephemeral_public,
            &rng,
        )
        .unwrap();
        group.bench_with_input(BenchmarkId::new("open", size), &sealed, |b, sealed| {
            b.iter(|| {
                open(
                    &exchange.shared_secret,
                    &sealed.iv,
                    black_box(&sealed.ciphertext),
                    &sealed.aad,
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_key_agreement, bench_cipher);
criterion_main!(benches);
