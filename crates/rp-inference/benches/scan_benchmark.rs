use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rp_core::{AucSolver, Sample, Uncertainty};
use rp_inference::{
    AucGrid, DeltaFunctionSolver, DiscreteProblem, DiscreteSolver, LikelihoodScanner, McConfig,
    ScanConfig, SystematicsMonteCarlo,
};
use std::hint::black_box;

fn simulate(n_nr: usize, n_r: usize, shift: f64, seed: u64) -> (Vec<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let d = Normal::new(0.0, 1.0).unwrap();
    let nr = (0..n_nr).map(|_| shift + d.sample(&mut rng)).collect();
    let r = (0..n_r).map(|_| d.sample(&mut rng)).collect();
    (nr, r)
}

fn grid() -> ScanConfig {
    ScanConfig { grid: AucGrid::Range { start: 0.5, stop: 0.95, step: 0.025 }, ..ScanConfig::default() }
}

fn bench_discrete_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan/discrete/n_scaling");
    group.sample_size(10);
    for n in [20usize, 80, 320] {
        let (nr, r) = simulate(n, n / 2, 1.0, 7);
        let solver = DiscreteSolver::new(DiscreteProblem::from_values(&nr, &r).unwrap());
        group.bench_with_input(BenchmarkId::from_parameter(n), &solver, |b, s| {
            b.iter(|| {
                let scan = LikelihoodScanner::new(grid()).scan(black_box(s)).unwrap();
                black_box(scan.points.len());
            });
        });
    }
    group.finish();
}

fn bench_delta_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit/delta/n_scaling");
    for n in [20usize, 80, 320] {
        let (nr, r) = simulate(n, n / 2, 1.0, 11);
        let solver = DeltaFunctionSolver::new(DiscreteProblem::from_values(&nr, &r).unwrap());
        group.bench_with_input(BenchmarkId::from_parameter(n), &solver, |b, s| {
            b.iter(|| black_box(s.solve(Some(black_box(0.6)), None).unwrap().nll));
        });
    }
    group.finish();
}

fn bench_mc_generate(c: &mut Criterion) {
    let (nr, r) = simulate(60, 30, 1.0, 3);
    let samples: Vec<Sample> = nr
        .iter()
        .map(|&v| Sample::non_responder(v).with_uncertainty(Uncertainty::gaussian(0.3)))
        .chain(
            r.iter().map(|&v| {
                Sample::responder(v).with_uncertainty(Uncertainty::gaussian(0.3).correlated("batch"))
            }),
        )
        .collect();

    let mut group = c.benchmark_group("mc/generate");
    for parallel in [false, true] {
        let cfg = McConfig { n_replicates: 500, parallel, ..McConfig::default() };
        let mc = SystematicsMonteCarlo::new(samples.clone(), cfg).unwrap();
        group.bench_function(BenchmarkId::new("parallel", parallel), |b| {
            b.iter(|| black_box(mc.generate().unwrap().replicates.len()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_discrete_scan, bench_delta_fit, bench_mc_generate);
criterion_main!(benches);
