use criterion::{black_box, criterion_group, criterion_main, Criterion};

use mph3::{BuildConf, Function, Mphf};

fn mphf_benchmark(c: &mut Criterion) {
    let keys: Vec<u64> = (0..100_000).collect();
    c.bench_function("mphf build 100k", |b| b.iter(|| {
        black_box(Mphf::from_slice(&keys)).len()
    }));
    let mphf = Mphf::from_slice(&keys);
    let mut k = 0;
    c.bench_function("mphf get", |b| b.iter(|| {
        k = (k + 7919) % keys.len();
        black_box(mphf.get(&keys[k]))
    }));
}

fn function_benchmark(c: &mut Criterion) {
    let keys: Vec<u64> = (0..100_000).collect();
    let values: Vec<u16> = keys.iter().map(|k| (k % 1000) as u16).collect();
    let f = Function::try_from_slices(&keys, &values, BuildConf::new()).unwrap();
    let mut k = 0;
    c.bench_function("function get", |b| b.iter(|| {
        k = (k + 7919) % keys.len();
        black_box(f.get(&keys[k]))
    }));
}

criterion_group!(benches, mphf_benchmark, function_benchmark);
criterion_main!(benches);
