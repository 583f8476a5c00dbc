//! End-to-end profiled likelihood scans on small binned models.
//!
//! Covers:
//! - scan + width against the closed-form Fisher uncertainty
//! - a signal-only bin (width ≈ sqrt(true_mu))
//! - nuisance profiling widens the interval and agrees with Fisher mode
//! - narrow scans fail with `NoRootsFound`
//! - unrolled and detached steps agree on values and (at convergence) gradients

use inferno_ad::{Tape, Var};
use inferno_core::Error;
use inferno_inference::{
    AsimovModel, AuxConstraints, Constraint, NewtonProfiler, ProfilerConfig, StepGraph, Variations,
    fisher, likelihood_width, likelihood_width_f64, linspace_step, profile_curve,
};

use approx::assert_relative_eq;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const TRUE_MU: f64 = 50.0;
const B_TRUE: f64 = 1000.0;

fn consts(t: &mut Tape, v: &[f64]) -> Vec<Var> {
    v.iter().map(|&x| t.constant(x)).collect()
}

fn detached(n_steps: usize) -> NewtonProfiler {
    NewtonProfiler::new(ProfilerConfig { n_steps, step_graph: StepGraph::Detached, ..Default::default() }).unwrap()
}

fn analytic_sigma(f_s: &[f64], f_b: &[f64]) -> f64 {
    let info: f64 = f_s.iter().zip(f_b).map(|(&s, &b)| s * s / (TRUE_MU * s + B_TRUE * b)).sum();
    (1.0 / info).sqrt()
}

fn scan_width(model: &AsimovModel, t: &mut Tape, profiler: &NewtonProfiler, scan: &[f64]) -> inferno_core::Result<f64> {
    let curve = profile_curve(t, model, profiler, scan)?.to_profile_curve(t);
    likelihood_width_f64(&curve, 0.5)
}

const F_S: [f64; 3] = [0.6, 0.3, 0.1];
const F_B: [f64; 3] = [0.2, 0.3, 0.5];
const B_UP: [f64; 3] = [0.21, 0.3, 0.49];
const B_DOWN: [f64; 3] = [0.19, 0.3, 0.51];

fn model_with_shape_nuisance(t: &mut Tape, f_s: Vec<Var>, f_b: Vec<Var>) -> AsimovModel {
    let var = Variations::constants(t, &[B_UP.to_vec()], &[B_DOWN.to_vec()]);
    AsimovModel::builder(TRUE_MU, B_TRUE, f_s, f_b)
        .background_variations(var)
        .constraints(AuxConstraints { shape: Some(vec![Constraint::unit_normal()]), ..Default::default() })
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn scan_width_matches_fisher_formula() {
    let (fs, fb) = ([1.0, 0.0], [0.5, 0.5]);
    let mut t = Tape::new();
    let f_s = consts(&mut t, &fs);
    let f_b = consts(&mut t, &fb);
    let model = AsimovModel::builder(TRUE_MU, B_TRUE, f_s, f_b).build().unwrap();

    let scan = linspace_step(20.0, 80.0, 1.0).unwrap();
    let width = scan_width(&model, &mut t, &detached(10), &scan).unwrap();
    let sigma = analytic_sigma(&fs, &fb);
    assert_relative_eq!(sigma, 550.0_f64.sqrt(), epsilon = 1e-12);
    assert_relative_eq!(width, sigma, max_relative = 1e-2);
}

#[test]
fn signal_only_bin_gives_poisson_width() {
    let mut t = Tape::new();
    let f_s = consts(&mut t, &[1.0, 0.0, 0.0]);
    let f_b = consts(&mut t, &[0.0, 0.5, 0.5]);
    let model = AsimovModel::builder(TRUE_MU, B_TRUE, f_s, f_b).build().unwrap();

    let scan = linspace_step(20.0, 80.0, 1.0).unwrap();
    let width = scan_width(&model, &mut t, &detached(5), &scan).unwrap();
    assert_relative_eq!(width, TRUE_MU.sqrt(), max_relative = 1e-2);
}

#[test]
fn profiled_nll_is_minimal_at_true_mu() {
    let mut t = Tape::new();
    let f_s = consts(&mut t, &F_S);
    let f_b = consts(&mut t, &F_B);
    let model = model_with_shape_nuisance(&mut t, f_s, f_b);

    let scan = linspace_step(20.0, 80.0, 5.0).unwrap();
    let curve = profile_curve(&mut t, &model, &detached(100), &scan).unwrap().to_profile_curve(&t);
    assert_relative_eq!(curve.mu_hat().unwrap(), TRUE_MU);
    // monotone on each side of the minimum
    let imin = curve.argmin().unwrap();
    assert!(curve.nll[..=imin].windows(2).all(|w| w[0] > w[1]));
    assert!(curve.nll[imin..].windows(2).all(|w| w[0] < w[1]));
    // nuisance at the true point stays nominal
    assert_relative_eq!(curve.nuisances[imin][0], 0.0, epsilon = 1e-9);
}

#[test]
fn shape_nuisance_widens_interval_consistently_with_fisher() {
    let scan = linspace_step(20.0, 80.0, 1.0).unwrap();

    let mut t = Tape::new();
    let f_s = consts(&mut t, &F_S);
    let f_b = consts(&mut t, &F_B);
    let plain = AsimovModel::builder(TRUE_MU, B_TRUE, f_s.clone(), f_b.clone()).build().unwrap();
    let with_nuisance = model_with_shape_nuisance(&mut t, f_s, f_b);

    let w_plain = scan_width(&plain, &mut t, &detached(5), &scan).unwrap();
    let w_nuis = scan_width(&with_nuisance, &mut t, &detached(100), &scan).unwrap();
    assert!(w_nuis > w_plain, "profiling a nuisance must widen the interval: {w_nuis} vs {w_plain}");

    let fi = fisher(&mut t, &with_nuisance, &detached(10), TRUE_MU).unwrap().to_result(&t);
    let sigma = fi.poi_uncertainty().unwrap();
    assert_relative_eq!(w_nuis, sigma, max_relative = 3e-2);

    let sigma_plain = analytic_sigma(&F_S, &F_B);
    assert_relative_eq!(w_plain, sigma_plain, max_relative = 1e-2);
}

#[test]
fn narrow_scan_reports_no_roots() {
    let mut t = Tape::new();
    let f_s = consts(&mut t, &[1.0, 0.0]);
    let f_b = consts(&mut t, &[0.5, 0.5]);
    let model = AsimovModel::builder(TRUE_MU, B_TRUE, f_s, f_b).build().unwrap();

    let scan = linspace_step(45.0, 55.0, 1.0).unwrap();
    let err = scan_width(&model, &mut t, &detached(5), &scan).unwrap_err();
    assert!(matches!(err, Error::NoRootsFound { .. }));
    assert!(err.is_numerical());
}

#[test]
fn unrolled_and_detached_agree_at_convergence() {
    let scan = linspace_step(20.0, 80.0, 4.0).unwrap();

    let run = |step_graph: StepGraph| {
        let mut t = Tape::new();
        let f_s: Vec<Var> = F_S.iter().map(|&v| t.var(v)).collect();
        let f_b = consts(&mut t, &F_B);
        let model = model_with_shape_nuisance(&mut t, f_s.clone(), f_b);
        let profiler =
            NewtonProfiler::new(ProfilerConfig { n_steps: 30, lr: 0.5, step_graph, ..Default::default() }).unwrap();
        let curve = profile_curve(&mut t, &model, &profiler, &scan).unwrap();
        let width = likelihood_width(&mut t, &curve.mu, &curve.nll, 0.5).unwrap();
        t.backward(width);
        let grads: Vec<f64> = f_s.iter().map(|&v| t.adjoint(v)).collect();
        (t.val(width), grads)
    };

    let (w_unrolled, g_unrolled) = run(StepGraph::Unrolled);
    let (w_detached, g_detached) = run(StepGraph::Detached);
    assert_relative_eq!(w_unrolled, w_detached, epsilon = 1e-10);
    for (a, b) in g_unrolled.iter().zip(&g_detached) {
        assert!(a.is_finite() && a.abs() > 0.0);
        assert_relative_eq!(a, b, max_relative = 1e-3, epsilon = 1e-6);
    }
}
