//! Profile scan of the discrete solver on the reference data set.

use approx::assert_relative_eq;
use rp_core::{AucSolver, Error, FailureReason, FittedCurve};
use rp_inference::{
    AucGrid, Bound, DiscreteProblem, DiscreteSolver, LikelihoodScanner, ScanConfig,
};
use rp_prob::mann_whitney_auc;

const RESPONDERS: [f64; 6] = [1.0, 1.0, 2.0, 3.0, 9.0, 10.0];
const NONRESPONDERS: [f64; 14] =
    [2.0, 3.0, 3.0, 4.0, 6.0, 8.0, 9.0, 10.0, 10.0, 10.0, 10.0, 11.0, 12.0, 13.0];

fn solver() -> DiscreteSolver {
    DiscreteSolver::new(DiscreteProblem::from_values(&NONRESPONDERS, &RESPONDERS).unwrap())
}

fn scan_config() -> ScanConfig {
    ScanConfig { grid: AucGrid::Range { start: 0.5, stop: 0.97, step: 0.01 }, ..ScanConfig::default() }
}

#[test]
fn nominal_auc_is_mann_whitney() {
    let s = solver();
    let mw = mann_whitney_auc(&NONRESPONDERS, &RESPONDERS);
    assert_relative_eq!(s.nominal_auc(), mw, epsilon = 1e-12);
    assert_relative_eq!(mw, 66.0 / 84.0, epsilon = 1e-12);
}

#[test]
fn scan_gives_proper_68_interval_around_nominal() {
    let s = solver();
    let scan = LikelihoodScanner::new(scan_config()).scan(&s).unwrap();

    let ci = scan.interval("68").unwrap();
    let (Bound::Closed(lo), Bound::Closed(hi)) = (ci.lower, ci.upper) else {
        panic!("68% interval not closed: {ci:?}");
    };
    let nominal = s.nominal_auc();
    assert!(lo < nominal && nominal < hi, "[{lo}, {hi}] vs {nominal}");
    assert!(hi - lo > 0.05 && hi - lo < 0.5);

    let ci95 = scan.interval("95").unwrap();
    if let Bound::Closed(lo95) = ci95.lower {
        assert!(lo95 < lo);
    }
    assert!(scan.diagnostics.consistent, "{:?}", scan.diagnostics);
}

#[test]
fn free_point_is_scan_minimum() {
    let scan = LikelihoodScanner::new(scan_config()).scan(&solver()).unwrap();
    let free = scan.points.iter().find(|p| p.is_free_fit).unwrap();
    assert_relative_eq!(free.twice_delta_nll.unwrap(), 0.0, epsilon = 1e-9);
    assert_relative_eq!(scan.min_nll(), scan.nll_hat, epsilon = 1e-9);
    for (_, d) in scan.twice_delta_nll() {
        assert!(d >= 0.0);
    }
}

#[test]
fn recorded_nll_round_trips() {
    let s = solver();
    let scan = LikelihoodScanner::new(scan_config()).scan(&s).unwrap();
    for fit in scan.points.iter().filter_map(|p| p.fit.as_ref()) {
        let FittedCurve::Weights { nonresponder, responder, .. } = &fit.curve else {
            panic!("discrete fits carry weights");
        };
        assert_eq!(s.problem().nll(nonresponder, responder), fit.nll);
    }
}

#[test]
fn out_of_range_auc_is_reported() {
    let s = solver();
    for target in [-0.2, 1.2] {
        match s.solve(Some(target), None) {
            Err(Error::OptimizationFailure { reason: FailureReason::Infeasible(_), .. }) => {}
            other => panic!("target {target}: expected infeasible, got {other:?}"),
        }
    }
}
