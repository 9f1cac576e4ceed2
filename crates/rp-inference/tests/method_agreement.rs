//! Delta-function and discrete solvers on a small untied data set.

use approx::assert_relative_eq;
use rp_core::AucSolver;
use rp_inference::{AnalysisConfig, FitMethod, RocAnalysis};

const RESPONDERS: [f64; 3] = [-10.0, 0.0, 10.0];
const NONRESPONDERS: [f64; 3] = [-5.0, 5.0, 15.0];

fn analysis() -> RocAnalysis {
    RocAnalysis::from_values(&NONRESPONDERS, &RESPONDERS, AnalysisConfig::default()).unwrap()
}

#[test]
fn free_fits_agree_exactly() {
    let a = analysis();
    let d = a.solver(FitMethod::Discrete).unwrap().solve(None, None).unwrap();
    let f = a.solver(FitMethod::DeltaFunctions).unwrap().solve(None, None).unwrap();
    assert_relative_eq!(d.auc, 6.0 / 9.0, epsilon = 1e-14);
    assert_relative_eq!(f.auc, d.auc, epsilon = 1e-12);
    assert_relative_eq!(f.nll, d.nll, epsilon = 1e-10);
}

#[test]
fn constrained_nll_agrees() {
    let a = analysis();
    let aucs = [0.45, 0.55, 0.6, 0.75, 0.85];
    let cmp = a.compare_methods(FitMethod::Discrete, FitMethod::DeltaFunctions, &aucs).unwrap();
    for p in &cmp.points {
        let (Some(nd), Some(nf)) = (p.nll_a, p.nll_b) else {
            panic!("both methods should converge at AUC={}: {p:?}", p.auc);
        };
        assert_relative_eq!(nd, nf, epsilon = 1e-4);
    }
    assert!(cmp.max_abs_difference().unwrap() < 1e-4);
}
