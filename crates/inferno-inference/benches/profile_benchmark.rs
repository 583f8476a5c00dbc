use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use inferno_ad::{Tape, Var};
use inferno_inference::{
    AsimovModel, AuxConstraints, Constraint, NewtonProfiler, ProfilerConfig, StepGraph, Variations, fisher,
    likelihood_width, linspace_step, profile_curve,
};
use std::hint::black_box;

fn shapes(n_bins: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
    let raw_s: Vec<f64> = (0..n_bins).map(|i| (-(i as f64) * 0.5).exp()).collect();
    let raw_b: Vec<f64> = (0..n_bins).map(|i| 1.0 + i as f64).collect();
    let norm = |v: Vec<f64>| {
        let s: f64 = v.iter().sum();
        v.into_iter().map(|x| x / s).collect::<Vec<f64>>()
    };
    let f_s = norm(raw_s);
    let f_b = norm(raw_b);
    let up = norm(f_b.iter().enumerate().map(|(i, &b)| b * (1.0 + 0.02 * i as f64)).collect());
    let down = norm(f_b.iter().enumerate().map(|(i, &b)| b * (1.0 - 0.02 * i as f64).max(0.5)).collect());
    (f_s, f_b, up, down)
}

fn model(t: &mut Tape, n_bins: usize) -> AsimovModel {
    let (fs, fb, up, down) = shapes(n_bins);
    let f_s: Vec<Var> = fs.iter().map(|&v| t.var(v)).collect();
    let f_b: Vec<Var> = fb.iter().map(|&v| t.var(v)).collect();
    let var = Variations::constants(t, &[up], &[down]);
    AsimovModel::builder(50.0, 1000.0, f_s, f_b)
        .background_variations(var)
        .constraints(AuxConstraints { shape: Some(vec![Constraint::unit_normal()]), ..Default::default() })
        .build()
        .unwrap()
}

fn bench_curve_width(c: &mut Criterion) {
    let mut group = c.benchmark_group("profile_curve");
    group.sample_size(10);
    let scan = linspace_step(20.0, 80.0, 1.0).unwrap();

    for step_graph in [StepGraph::Detached, StepGraph::Unrolled] {
        let profiler =
            NewtonProfiler::new(ProfilerConfig { n_steps: 20, step_graph, ..Default::default() }).unwrap();
        group.bench_with_input(BenchmarkId::new("width_backward", format!("{step_graph:?}")), &profiler, |b, p| {
            b.iter(|| {
                let mut t = Tape::with_capacity(1 << 16);
                let m = model(&mut t, 10);
                let curve = profile_curve(&mut t, &m, p, &scan).unwrap();
                let w = likelihood_width(&mut t, &curve.mu, &curve.nll, 0.5).unwrap();
                t.backward(w);
                black_box(t.val(w));
            })
        });
    }

    group.finish();
}

fn bench_fisher(c: &mut Criterion) {
    let mut group = c.benchmark_group("fisher");

    for n_bins in [4usize, 10, 32] {
        let profiler = NewtonProfiler::new(ProfilerConfig { n_steps: 10, ..Default::default() }).unwrap();
        group.bench_with_input(BenchmarkId::new("inverse_fisher_backward", n_bins), &n_bins, |b, &n| {
            b.iter(|| {
                let mut t = Tape::with_capacity(1 << 14);
                let m = model(&mut t, n);
                let fi = fisher(&mut t, &m, &profiler, 50.0).unwrap();
                let v = fi.poi_variance();
                t.backward(v);
                black_box(t.val(v));
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_curve_width, bench_fisher);
criterion_main!(benches);
