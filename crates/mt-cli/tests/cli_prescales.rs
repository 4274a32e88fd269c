use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mutag"))
}

fn tmp_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("mutag_cli_prescales_{}_{}_{}", std::process::id(), nanos, tag));
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

fn write_fixture(dir: &Path) -> PathBuf {
    let doc = serde_json::json!({
        "schema_version": 2,
        "corrections": [
            {"name": "prescaleWeight", "data": {"nodetype": "category", "content": [
                {"key": "355100", "value": {"nodetype": "category", "content": [
                    {"key": "HLT_BTagMu_AK8Jet300_Mu5", "value": 1.0},
                    {"key": "HLT_BTagMu_AK4Jet300_Mu5", "value": {
                        "nodetype": "binning", "edges": [1.0, 11.0, 41.0], "content": [2.0, 4.0], "flow": "clamp"
                    }}
                ]}},
                {"key": "355200", "value": {"nodetype": "category", "content": [
                    {"key": "HLT_BTagMu_AK8Jet300_Mu5", "value": 1.0}
                ]}}
            ]}}
        ]
    });
    std::fs::write(dir.join("ps_2022.json"), serde_json::to_string(&doc).unwrap()).unwrap();
    let config = r#"
HLT_triggers_prescales:
  "2022_preEE":
    BTagMu:
      BTagMu_AK8Jet300_Mu5: "${config_dir:}/ps_2022.json"
      BTagMu_AK4Jet300_Mu5: "${config_dir:}/ps_2022.json"
      BTagMu_AK4DiJet70_Mu5: "${config_dir:}/missing.json"
"#;
    let path = dir.join("prescales.yaml");
    std::fs::write(&path, config).unwrap();
    path
}

#[test]
fn analyze_writes_tables() {
    let dir = tmp_dir("analyze");
    let config = write_fixture(&dir);
    let out_dir = dir.join("analysis");

    let out = run(&["prescales", "analyze", "--config", &s(&config), "-o", &s(&out_dir)]);
    assert!(out.status.success(), "analyze failed, stderr={}", String::from_utf8_lossy(&out.stderr));
    let overall: serde_json::Value = serde_json::from_slice(&out.stdout).expect("stdout should be valid JSON");
    // the shared file is read once
    assert_eq!(overall["total_entries"], 4);
    assert_eq!(overall["unique_runs"], 2);
    assert_eq!(overall["unique_hlt_paths"], 2);

    for name in [
        "prescale_raw_data.csv",
        "averages_by_hlt_path.csv",
        "averages_by_run.csv",
        "averages_by_run_and_path.csv",
        "overall_statistics.json",
    ] {
        assert!(out_dir.join(name).is_file(), "{name} missing");
    }
    let raw = std::fs::read_to_string(out_dir.join("prescale_raw_data.csv")).unwrap();
    assert_eq!(raw.lines().count(), 5);
    assert!(raw.contains("ps_2022.json"));

    let none = run(&["prescales", "analyze", "--config", &s(&config), "-o", &s(&out_dir), "--year", "2018"]);
    assert!(!none.status.success());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn yaml_holds_weighted_averages() {
    let dir = tmp_dir("yaml");
    let config = write_fixture(&dir);
    let yaml = dir.join("avg.yaml");

    let out = run(&["prescales", "yaml", "--config", &s(&config), "-o", &s(&yaml)]);
    assert!(out.status.success(), "yaml failed, stderr={}", String::from_utf8_lossy(&out.stderr));
    let doc: serde_yaml_ng::Value = serde_yaml_ng::from_str(&std::fs::read_to_string(&yaml).unwrap()).unwrap();
    let group = &doc["HLT_triggers_prescales"]["2022_preEE"]["BTagMu"];
    assert_eq!(group["HLT_BTagMu_AK8Jet300_Mu5"].as_i64(), Some(1));
    // (2 * 10 + 4 * 30) / 40
    approx::assert_relative_eq!(group["HLT_BTagMu_AK4Jet300_Mu5"].as_f64().unwrap(), 3.5);

    let _ = std::fs::remove_dir_all(&dir);
}
