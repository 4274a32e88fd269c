use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use mt_events::ingest::jsonl::write_jsonl_events;
use mt_events::{Event, FatJet, Muon, SecondaryVertex};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mutag"))
}

fn tmp_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("mutag_cli_pipeline_{}_{}_{}", std::process::id(), nanos, tag));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn s(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn event(number: u64, gen_weight: Option<f64>, pt: f64) -> Event {
    let jet = FatJet {
        pt,
        eta: 0.2,
        phi: 0.5,
        mass: 100.0,
        msoftdrop: 90.0,
        jet_id: 6,
        tau1: 0.5,
        tau2: 0.15,
        n_b_hadrons: gen_weight.map(|_| 1),
        n_c_hadrons: gen_weight.map(|_| 0),
        extra: BTreeMap::from([("particleNet_XbbVsQCD".to_string(), 0.95)]),
        ..Default::default()
    };
    let muon = Muon {
        pt: 10.0,
        eta: 0.3,
        phi: 0.6,
        pf_rel_iso04_all: 0.5,
        ids: BTreeMap::from([("looseId".to_string(), true)]),
        ..Default::default()
    };
    let sv = SecondaryVertex { pt: 20.0, eta: 0.25, phi: 0.55, mass: 2.0, dxy_sig: 5.0, p_angle: 0.01, ..Default::default() };
    Event {
        run: 1,
        luminosity_block: 1,
        event: number,
        n_pv_good: 20,
        gen_weight,
        hlt: BTreeMap::from([("BTagMu_AK8Jet300_Mu5".to_string(), true), ("BTagMu_AK4DiJet70_Mu5".to_string(), false)]),
        fatjets: vec![jet],
        muons: vec![muon],
        svs: vec![sv],
        ..Default::default()
    }
}

fn write_inputs(dir: &Path) -> PathBuf {
    let mc = vec![event(11, Some(1.0), 420.0), event(12, Some(1.0), 520.0)];
    let data = vec![event(21, None, 380.0), event(22, None, 460.0), event(23, None, 610.0)];
    write_jsonl_events(&dir.join("qcd.jsonl"), &mc).unwrap();
    write_jsonl_events(&dir.join("data.jsonl"), &data).unwrap();
    let datasets = serde_json::json!({
        "QCD_2018": {"metadata": {"sample": "QCD_MuEnriched", "year": "2018", "isMC": "True", "xsec": 10},
                     "files": ["qcd.jsonl"]},
        "DATA_BTagMu_2018A": {"metadata": {"sample": "DATA_BTagMu", "year": "2018", "isMC": "False", "era": "A"},
                              "files": ["data.jsonl"]}
    });
    std::fs::write(dir.join("datasets.json"), serde_json::to_string_pretty(&datasets).unwrap()).unwrap();

    let config = r#"
workflow: fatjet_base
datasets:
  jsons: ["${config_dir:}/datasets.json"]
parameters:
  HLT_triggers:
    "2018":
      BTagMu: [BTagMu_AK8Jet300_Mu5]
  lumi:
    "2018": 1000.0
skim:
  - {type: n_pv_good, min: 1}
  - {type: hlt}
preselections:
  - {type: n_obj_min, coll: FatJetGood, n: 1}
categories:
  inclusive:
    - {type: passthrough}
weights:
  common: [genWeight, lumi, XS]
variable_presets:
  - {preset: fatjet, coll: FatJetGood}
run_options:
  chunk: 2
"#;
    let path = dir.join("config.yaml");
    std::fs::write(&path, config).unwrap();
    path
}

#[test]
fn run_then_quantiles_and_triggers() {
    let dir = tmp_dir("run");
    let config = write_inputs(&dir);
    let output = dir.join("output.json.gz");

    let out = run(&["run", &s(&config), "-o", &s(&output), "--workers", "1"]);
    assert!(out.status.success(), "run failed, stderr={}", String::from_utf8_lossy(&out.stderr));
    let summary: serde_json::Value = serde_json::from_slice(&out.stdout).expect("stdout should be valid JSON");
    assert_eq!(summary["datasets"].as_array().unwrap().len(), 2);
    assert!(output.is_file());

    let saved = mt_analysis::Output::load(&output).unwrap();
    assert!(saved.variables.contains_key("FatJetGood_pt"));

    let yaml = dir.join("quantiles.yaml");
    let out = run(&["pt-quantiles", "-i", &s(&output), "-o", &s(&yaml), "--quantiles", "0.5,1.0"]);
    assert!(out.status.success(), "pt-quantiles failed, stderr={}", String::from_utf8_lossy(&out.stderr));
    let q: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let pt_max = q["2018"]["1"].as_f64().expect("quantile 1.0 present");
    let pt_med = q["2018"]["0.5"].as_f64().expect("quantile 0.5 present");
    assert!(pt_med <= pt_max);
    assert!(std::fs::read_to_string(&yaml).unwrap().contains("'2018':"));

    let bad = run(&["pt-quantiles", "-i", &s(&output), "-o", &s(&yaml), "--quantiles", "1.5"]);
    assert!(!bad.status.success());

    let out = run(&["triggers", "--datasets", &s(&dir.join("datasets.json")), "--years", "2018", "--select", "ak8"]);
    assert!(out.status.success(), "triggers failed, stderr={}", String::from_utf8_lossy(&out.stderr));
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("HLT_triggers:"), "{text}");
    assert!(text.contains("BTagMu_AK8Jet300_Mu5"), "{text}");
    assert!(!text.contains("AK4DiJet70"), "{text}");

    let _ = std::fs::remove_dir_all(&dir);
}
