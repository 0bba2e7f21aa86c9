use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use basin_decomp::algs::communicator::WorkerGroup;
use basin_decomp::partitioning::{GlobalGrid, MaskStrategy, masked_decompose, simple_decompose};

// Irregular basin: a noisy disc covering roughly half the grid
fn basin_mask(ny: usize, nx: usize, seed: u64) -> Vec<u8> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let (cy, cx) = (ny as f64 / 2.0, nx as f64 / 2.0);
    let r = 0.4 * ny.min(nx) as f64;
    (0..ny)
        .flat_map(|y| (0..nx).map(move |x| (x, y)))
        .map(|(x, y)| {
            let d = ((x as f64 - cx).powi(2) + (y as f64 - cy).powi(2)).sqrt();
            (d < r * (0.9 + 0.2 * rng.r#gen::<f64>())) as u8
        })
        .collect()
}

fn bench_masked_decompose(c: &mut Criterion) {
    let mut group = c.benchmark_group("masked_decompose");
    group.sample_size(20);

    for &(n, workers) in &[(256, 4), (512, 4), (512, 8)] {
        let grid = GlobalGrid {
            nx: n,
            ny: n,
            dx: 30.0,
            dy: 30.0,
            xorig: 0.0,
            yorig: 0.0,
        };
        let mask = basin_mask(n, n, 42);
        for strategy in [MaskStrategy::NaturalBlocks, MaskStrategy::StripeLongestAxis] {
            group.bench_with_input(
                BenchmarkId::new(format!("{strategy:?}"), format!("{n}x{n}/{workers}")),
                &mask,
                |b, mask| {
                    b.iter(|| {
                        WorkerGroup::run(workers, |comm| {
                            let prelim = simple_decompose(comm, &grid)?;
                            let p = &prelim.partition;
                            let local: Vec<u8> = (0..p.ny)
                                .flat_map(|y| {
                                    let start = (p.offset_y + y) * n + p.offset_x;
                                    mask[start..start + p.nx].iter().copied()
                                })
                                .collect();
                            masked_decompose(comm, &grid, &prelim, &local, strategy).map(|(d, _)| d.partition.num_cells)
                        })
                        .expect("worker group")
                    })
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_masked_decompose);
criterion_main!(benches);
