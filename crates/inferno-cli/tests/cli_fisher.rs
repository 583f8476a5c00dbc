use approx::assert_relative_eq;
use std::path::PathBuf;
use std::process::{Command, Output};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_inferno"))
}

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../tests/fixtures").join(name)
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn fisher_json(fixture: &str) -> serde_json::Value {
    let input = fixture_path(fixture);
    let out = run(&["fisher", "--input", input.to_string_lossy().as_ref()]);
    assert!(out.status.success(), "fisher should succeed, stderr={}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).expect("stdout should be valid JSON")
}

#[test]
fn fisher_matches_closed_form_without_nuisances() {
    let v = fisher_json("two_bin_shapes.json");
    let names: Vec<&str> = v["parameter_names"].as_array().unwrap().iter().map(|n| n.as_str().unwrap()).collect();
    assert_eq!(names, vec!["mu"]);
    assert_eq!(v["poi_index"].as_u64(), Some(0));

    let expected = 1.0 / (0.81 / 145.0 + 0.01 / 905.0);
    assert_relative_eq!(v["poi_variance"].as_f64().unwrap(), expected, max_relative = 1e-6);
    assert_relative_eq!(v["sigma_mu"].as_f64().unwrap(), expected.sqrt(), max_relative = 1e-6);
}

#[test]
fn fisher_with_shape_nuisance() {
    let v = fisher_json("two_bin_shape_syst.json");
    let names: Vec<&str> = v["parameter_names"].as_array().unwrap().iter().map(|n| n.as_str().unwrap()).collect();
    assert_eq!(names, vec!["alpha_shape_0", "mu"]);
    assert_eq!(v["covariance"].as_array().unwrap().len(), 4);

    // I = [[I_aa, I_am], [I_am, I_mm]] from d(lambda)/d(alpha) = [20, -20], d(lambda)/d(mu) = [0.9, 0.1]
    let i_aa = 400.0 / 145.0 + 400.0 / 905.0 + 1.0;
    let i_am = 0.9 * 20.0 / 145.0 - 0.1 * 20.0 / 905.0;
    let i_mm = 0.81 / 145.0 + 0.01 / 905.0;
    let var_mu = i_aa / (i_aa * i_mm - i_am * i_am);
    assert_relative_eq!(v["poi_variance"].as_f64().unwrap(), var_mu, max_relative = 1e-6);
}

#[test]
fn fisher_respects_true_mu_flag() {
    let input = fixture_path("two_bin_shapes.json");
    let out = run(&["fisher", "--input", input.to_string_lossy().as_ref(), "--true-mu", "50"]);
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["true_mu"].as_f64(), Some(50.0));
}
