use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nexuskit::mask::apply_mask;

fn unmask_benchmark(c: &mut Criterion) {
  let mut group = c.benchmark_group("apply_mask");
  let key = [0x12, 0x34, 0x56, 0x78];

  for size in [64usize, 4096, 65536] {
    let payload = vec![0xAAu8; size];
    group.bench_function(format!("{size}_bytes"), |b| {
      b.iter_batched(
        || payload.clone(),
        |mut buf| {
          apply_mask(black_box(&mut buf), black_box(key));
          buf
        },
        criterion::BatchSize::SmallInput,
      )
    });
  }

  group.finish();
}

criterion_group!(benches, unmask_benchmark);
criterion_main!(benches);
