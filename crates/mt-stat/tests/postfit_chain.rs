//! Fit logs → fitResults.json → SF summary, across a card tree.

use approx::assert_relative_eq;
use mt_stat::fit_results::{RESULTS_CSV, RESULTS_JSON, extract_fit_results};
use mt_stat::sf_summary::{SfType, collect_summaries, tau21_dir, write_summaries};

fn tmp_dir(tag: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    let p = std::env::temp_dir().join(format!("mutag_postfit_{}_{}_{}", std::process::id(), nanos, tag));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn multidim_log(r: f64, sf_c: f64) -> String {
    format!(
        " --- MultiDimFit ---\nbest fit parameter values and profile-likelihood uncertainties:\n   \
         r :    +{r:.3}   -0.040/+0.050 (68%)\n   SF_c :    +{sf_c:.3}   -0.200/+0.300 (68%)\n"
    )
}

#[test]
fn extraction_feeds_summary() {
    let base = tmp_dir("chain");
    let groups = [
        "msd-80to170_Pt-300to350_particleNet_XbbVsQCD-HHbbtt",
        "msd-80to170_Pt-425toInf_particleNet_XbbVsQCD-HHbbtt",
    ];
    for (k, group) in groups.iter().enumerate() {
        for (t, shift) in [(0.20, -0.03), (0.30, 0.0), (0.40, 0.08)] {
            let dir = base.join("2022_preEE").join(group).join(tau21_dir(t));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(format!("fitDiagnostics.{group}.log")), "Best fit r: 1 -0.1/+0.1  (68% CL)\n")
                .unwrap();
            let r = 1.0 + 0.1 * k as f64 + shift;
            std::fs::write(dir.join(format!("multiDimFit.{group}.log")), multidim_log(r, 1.1)).unwrap();
            let row = extract_fit_results(&dir).unwrap();
            assert_eq!(row.year, "2022_preEE");
            assert!(dir.join(RESULTS_JSON).is_file());
            assert!(dir.join(RESULTS_CSV).is_file());
        }
    }

    let b = collect_summaries(&base, SfType::B, &[]).unwrap();
    assert_eq!(b.len(), 2);
    assert_eq!(b[0].pt_label, "p_{T} = [300, 350]");
    assert_eq!(b[1].pt_label, "p_{T} \\geq 425");
    assert_relative_eq!(b[1].value, 1.1, epsilon = 1e-9);
    assert_relative_eq!(b[0].tau21_syst, 0.08, epsilon = 1e-9);
    assert_relative_eq!(b[0].total_err_up, (0.05f64.powi(2) + 0.08f64.powi(2)).sqrt(), epsilon = 1e-9);

    let c = collect_summaries(&base, SfType::C, &[]).unwrap();
    assert_eq!(c.len(), 2);
    assert_relative_eq!(c[0].tau21_syst, 0.0);

    let out = base.join("plots");
    write_summaries(&out, SfType::C, &c).unwrap();
    assert!(out.join("2022_preEE").join("SFc_tau21_sys.json").is_file());
    assert!(out.join("2022_preEE").join("SFc_summary.csv").is_file());
    let _ = std::fs::remove_dir_all(&base);
}
