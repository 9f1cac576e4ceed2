//! Datacard input through both band constructions.

use rp_core::Group;
use rp_inference::{AnalysisConfig, AucGrid, FitMethod, McConfig, RocAnalysis, ScanConfig};
use rp_translate::Datacard;

const CARD: &str = "\
# responders tend to score low
observable_type fixed
response   responder responder responder responder responder responder non-responder non-responder non-responder non-responder non-responder non-responder non-responder non-responder
---
observable 1.0 1.0 2.0 3.0 9.0 10.0 2.0 3.0 3.0 4.0 6.0 8.0 9.0 10.0
calib      lnN 1.05 1.05 1.05 1.05 1.05 1.05 - - - - - - - -
";

fn config() -> AnalysisConfig {
    AnalysisConfig {
        method: FitMethod::Discrete,
        scan: ScanConfig {
            grid: AucGrid::Range { start: 0.4, stop: 0.98, step: 0.02 },
            ..ScanConfig::default()
        },
        mc: McConfig { n_replicates: 200, ..McConfig::default() },
        ..AnalysisConfig::default()
    }
}

#[test]
fn datacard_feeds_both_band_kinds() {
    let card = Datacard::parse_str(CARD).unwrap();
    let samples = card.samples().unwrap();
    assert_eq!(samples.iter().filter(|s| s.group == Group::Responder).count(), 6);

    let analysis = RocAnalysis::new(samples, config()).unwrap();
    let nominal = analysis.nominal_roc().auc();

    let lik = analysis.likelihood_bands().unwrap();
    let free = lik.curve("nominal").unwrap();
    assert!((free.auc - nominal).abs() < 1e-9);
    assert!(lik.scan.interval("68").unwrap().contains(nominal));

    let sys = analysis.systematics_bands().unwrap();
    assert!((sys.ensemble.nominal_auc - nominal).abs() < 1e-12);
    let art = sys.artifact().unwrap();
    assert_eq!(art.rows.len(), McConfig::default().x_grid.len());
    for r in &art.rows {
        assert!(r[3] <= r[1] + 1e-12 && r[1] <= r[2] + 1e-12 && r[2] <= r[4] + 1e-12);
    }
}

const RATIO_CARD: &str = "\
observable_type poisson_ratio
response responder responder responder non-responder non-responder non-responder non-responder
num      2 3 4 9 12 8 15
denom    4 5 4 3 4 2 5
";

#[test]
fn ratio_card_varies_under_resampling() {
    let samples = Datacard::parse_str(RATIO_CARD).unwrap().samples().unwrap();
    let cfg = AnalysisConfig { mc: McConfig { n_replicates: 300, ..McConfig::default() }, ..config() };
    let analysis = RocAnalysis::new(samples, cfg).unwrap();
    let sys = analysis.systematics_bands().unwrap();
    let aucs = sys.ensemble.aucs();
    assert!(aucs.iter().all(|a| (0.0..=1.0).contains(a)));
    assert!(aucs.iter().any(|&a| (a - sys.ensemble.nominal_auc).abs() > 1e-9));
}
