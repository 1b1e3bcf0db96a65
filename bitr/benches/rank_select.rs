use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bitr::{Rank, Rank9, RankCompact, SpanSelect};

fn pseudo_random_words(len: usize) -> Vec<u64> {
    (0..len).map(|i| (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(i as u32)).collect()
}

fn rank_benchmark(c: &mut Criterion) {
    let words = pseudo_random_words(1 << 14);
    let len = words.len() * 64;
    let rank9 = Rank9::new(words.clone().into_boxed_slice(), len);
    let compact = RankCompact::new(words.into_boxed_slice(), len);
    let mut i = 0;
    c.bench_function("rank9 rank", |b| b.iter(|| {
        i = (i + 7919) % len;
        black_box(rank9.rank(i))
    }));
    c.bench_function("compact rank", |b| b.iter(|| {
        i = (i + 7919) % len;
        black_box(compact.rank(i))
    }));
}

fn select_benchmark(c: &mut Criterion) {
    let words = pseudo_random_words(1 << 14);
    let len = words.len() * 64;
    let select = SpanSelect::<false>::new(&words, len);
    let n = select.num_items();
    let mut r = 0;
    c.bench_function("span select", |b| b.iter(|| {
        r = (r + 7919) % n;
        black_box(select.try_select_in(&words, r))
    }));
    c.bench_function("span select bulk 1024", |b| {
        let mut dest = vec![0u64; 1024];
        b.iter(|| {
            select.fill_select_in(&words, 0, &mut dest);
            black_box(dest[1023])
        })
    });
}

criterion_group!(benches, rank_benchmark, select_benchmark);
criterion_main!(benches);
