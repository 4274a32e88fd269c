//! Running the external combine tools over the datacard tree.
//!
//! The tree is `{base}/{year}/{category}/{cut}`; every step walks it in
//! sorted order and only enters categories that are allowed (all of them
//! when the allow-list is empty).

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use mt_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::create::COMBINE_SCRIPT;
use crate::fit_results::{FitRow, extract_fit_results, write_rows_csv};

/// Workspace produced by `combine_cards.sh`.
pub const WORKSPACE: &str = "workspace.root";
/// Status file written after each fit.
pub const FIT_STATUS: &str = "fit_status.json";
/// Default summary of [`fit_all`].
pub const ALL_FIT_RESULTS: &str = "ALL_FIT_RESULTS.csv";

/// One `{year}/{category}/{cut}` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutDir {
    /// Period
    pub year: String,
    /// Template group
    pub category: String,
    /// τ21 cut label
    pub cut: String,
    /// Directory
    pub path: PathBuf,
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| Error::io_at(dir, e))? {
        let path = entry.map_err(|e| Error::io_at(dir, e))?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            out.push((name.to_string(), path.clone()));
        }
    }
    out.sort();
    Ok(out)
}

/// Cut directories below `base`, restricted to `allowed` categories.
pub fn cut_dirs(base: &Path, allowed: &[String]) -> Result<Vec<CutDir>> {
    let mut out = Vec::new();
    for (year, year_path) in sorted_subdirs(base)? {
        for (category, cat_path) in sorted_subdirs(&year_path)? {
            if !allowed.is_empty() && !allowed.contains(&category) {
                continue;
            }
            for (cut, path) in sorted_subdirs(&cat_path)? {
                out.push(CutDir { year: year.clone(), category: category.clone(), cut, path });
            }
        }
    }
    Ok(out)
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Run `bash combine_cards.sh` in every cut directory. Directories without
/// the script are skipped; a failing script stops the walk.
pub fn run_combine_cards(base: &Path, allowed: &[String]) -> Result<usize> {
    let mut ran = 0;
    for dir in cut_dirs(base, allowed)? {
        if !dir.path.join(COMBINE_SCRIPT).is_file() {
            tracing::warn!(year = %dir.year, category = %dir.category, cut = %dir.cut, "combine_cards.sh not found; skipping");
            continue;
        }
        tracing::info!(year = %dir.year, category = %dir.category, cut = %dir.cut, "combining cards");
        let status = Command::new("bash")
            .arg(COMBINE_SCRIPT)
            .current_dir(&dir.path)
            .status()
            .map_err(|e| Error::External(format!("failed to run bash: {e}")))?;
        if !status.success() {
            return Err(Error::External(format!(
                "{COMBINE_SCRIPT} failed in {} (exit code {})",
                dir.path.display(),
                exit_code(status)
            )));
        }
        ran += 1;
    }
    Ok(ran)
}

/// Settings of the combine fits.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    /// combine executable
    pub combine: String,
    /// Also run MultiDimFit `--algo singles` for the POI uncertainties
    pub multidimfit: bool,
    /// Arguments appended to every command
    pub extra_args: Vec<String>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self { combine: "combine".into(), multidimfit: true, extra_args: Vec::new() }
    }
}

/// Options shared by both fits: POIs, frozen light factor and r range.
fn poi_args() -> Vec<String> {
    [
        "--redefineSignalPOIs",
        "r,SF_c,SF_light",
        "--setParameters",
        "SF_light=1",
        "--freezeParameters",
        "SF_light",
        "--rMin",
        "0",
        "--rMax",
        "10",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// `combine -M FitDiagnostics` for `category`.
pub fn fitdiagnostics_command(opts: &FitOptions, category: &str) -> Vec<String> {
    let mut cmd: Vec<String> = [
        opts.combine.as_str(),
        "-M",
        "FitDiagnostics",
        "-d",
        WORKSPACE,
        "--name",
        &format!(".{category}"),
        "--cminDefaultMinimizerStrategy",
        "1",
        "--saveWorkspace",
        "--saveShapes",
        "--saveWithUncertainties",
        "--saveOverallShapes",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    cmd.extend(poi_args());
    cmd.extend(opts.extra_args.iter().cloned());
    cmd
}

/// `combine -M MultiDimFit --algo singles` for `category`.
pub fn multidimfit_command(opts: &FitOptions, category: &str) -> Vec<String> {
    let mut cmd: Vec<String> = [
        opts.combine.as_str(),
        "-M",
        "MultiDimFit",
        "-d",
        WORKSPACE,
        "--name",
        &format!(".{category}"),
        "--algo",
        "singles",
        "--cminDefaultMinimizerStrategy",
        "1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    cmd.extend(poi_args());
    cmd.extend(opts.extra_args.iter().cloned());
    cmd
}

/// Contents of `fit_status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitStatus {
    /// Category (parent directory name)
    pub category: String,
    /// Working directory
    pub cwd: String,
    /// FitDiagnostics command line
    pub command: String,
    /// FitDiagnostics exit code (-1 when killed by a signal)
    pub returncode: i32,
    /// MultiDimFit exit code when it ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multidimfit_returncode: Option<i32>,
    /// RFC 3339 time of the fit
    pub timestamp: String,
    /// FitDiagnostics ROOT output
    pub fit_root_file: String,
    /// combine's own ROOT output
    pub combine_output: String,
}

impl FitStatus {
    /// Whether the FitDiagnostics fit exited cleanly.
    pub fn succeeded(&self) -> bool {
        self.returncode == 0
    }
}

/// Run `cmd` in `dir` with stdout and stderr sent to `log`.
fn run_logged(cmd: &[String], dir: &Path, log: &Path) -> Result<i32> {
    let (program, args) = cmd.split_first().ok_or_else(|| Error::External("empty command".into()))?;
    let out = File::create(log).map_err(|e| Error::io_at(log, e))?;
    let err = out.try_clone().map_err(|e| Error::io_at(log, e))?;
    let status = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(err))
        .status()
        .map_err(|e| Error::External(format!("failed to run {program}: {e}")))?;
    Ok(exit_code(status))
}

/// Fit the workspace of one cut directory and write `fit_status.json`.
///
/// A non-zero exit code is logged and recorded, not turned into an error.
pub fn run_fit(cut_dir: &Path, opts: &FitOptions) -> Result<FitStatus> {
    if !cut_dir.join(WORKSPACE).is_file() {
        return Err(Error::Validation(format!("{WORKSPACE} not found in {}", cut_dir.display())));
    }
    let category = cut_dir
        .parent()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Validation(format!("cannot infer the category of {}", cut_dir.display())))?
        .to_string();

    let cmd = fitdiagnostics_command(opts, &category);
    let log = cut_dir.join(format!("fitDiagnostics.{category}.log"));
    tracing::info!(category = %category, log = %log.display(), "running FitDiagnostics");
    let returncode = run_logged(&cmd, cut_dir, &log)?;
    if returncode != 0 {
        tracing::error!(category = %category, returncode, "FitDiagnostics failed");
    }

    let multidimfit_returncode = if opts.multidimfit {
        let log = cut_dir.join(format!("multiDimFit.{category}.log"));
        let rc = run_logged(&multidimfit_command(opts, &category), cut_dir, &log)?;
        if rc != 0 {
            tracing::error!(category = %category, returncode = rc, "MultiDimFit failed");
        }
        Some(rc)
    } else {
        None
    };

    let status = FitStatus {
        cwd: cut_dir.display().to_string(),
        command: cmd.join(" "),
        returncode,
        multidimfit_returncode,
        timestamp: chrono::Utc::now().to_rfc3339(),
        fit_root_file: format!("fitDiagnostics.{category}.root"),
        combine_output: format!("higgsCombine.{category}.FitDiagnostics.mH120.root"),
        category,
    };
    let path = cut_dir.join(FIT_STATUS);
    std::fs::write(&path, serde_json::to_string_pretty(&status)?).map_err(|e| Error::io_at(&path, e))?;
    Ok(status)
}

/// Fit and extract every allowed cut directory, then write the collected
/// rows to `summary`. Directories whose results cannot be extracted are
/// reported and left out.
pub fn fit_all(base: &Path, allowed: &[String], opts: &FitOptions, summary: &Path) -> Result<Vec<FitRow>> {
    let mut rows = Vec::new();
    for dir in cut_dirs(base, allowed)? {
        tracing::info!(year = %dir.year, category = %dir.category, cut = %dir.cut, "fitting");
        let status = run_fit(&dir.path, opts)?;
        if !status.succeeded() {
            continue;
        }
        match extract_fit_results(&dir.path) {
            Ok(row) => rows.push(row),
            Err(e) => tracing::warn!(dir = %dir.path.display(), error = %e, "no fit results"),
        }
    }
    if rows.is_empty() {
        tracing::warn!("no fit result collected");
    } else {
        write_rows_csv(summary, &rows)?;
        tracing::info!(path = %summary.display(), rows = rows.len(), "saved fit summary");
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        let p = std::env::temp_dir().join(format!("mutag_combine_{}_{}_{}", std::process::id(), nanos, tag));
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    #[test]
    fn fit_command_defaults() {
        let cmd = fitdiagnostics_command(&FitOptions::default(), "msd-80to170");
        let line = cmd.join(" ");
        assert!(line.starts_with("combine -M FitDiagnostics -d workspace.root --name .msd-80to170"));
        assert!(line.contains("--redefineSignalPOIs r,SF_c,SF_light"));
        assert!(line.contains("--setParameters SF_light=1 --freezeParameters SF_light"));
        assert!(line.ends_with("--rMin 0 --rMax 10"));
        let md = multidimfit_command(&FitOptions::default(), "x").join(" ");
        assert!(md.contains("-M MultiDimFit") && md.contains("--algo singles"));
    }

    #[test]
    fn walks_allowed_categories_in_order() {
        let base = tmp_dir("walk");
        for p in ["2018/catB/tau21_0p30", "2018/catA/tau21_0p35", "2018/catA/tau21_0p30", "2017/catA/tau21_0p30"] {
            std::fs::create_dir_all(base.join(p)).unwrap();
        }
        std::fs::write(base.join("2018/notes.txt"), "").unwrap();
        let dirs = cut_dirs(&base, &[]).unwrap();
        let labels: Vec<String> = dirs.iter().map(|d| format!("{}/{}/{}", d.year, d.category, d.cut)).collect();
        assert_eq!(
            labels,
            ["2017/catA/tau21_0p30", "2018/catA/tau21_0p30", "2018/catA/tau21_0p35", "2018/catB/tau21_0p30"]
        );
        let only_b = cut_dirs(&base, &["catB".to_string()]).unwrap();
        assert_eq!(only_b.len(), 1);
        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn fit_requires_workspace() {
        let base = tmp_dir("nows");
        let dir = base.join("2018/cat/tau21_0p30");
        std::fs::create_dir_all(&dir).unwrap();
        let err = run_fit(&dir, &FitOptions::default()).unwrap_err().to_string();
        assert!(err.contains(WORKSPACE));
        let _ = std::fs::remove_dir_all(&base);
    }

    #[cfg(unix)]
    #[test]
    fn fake_combine_round_trip() {
        use std::os::unix::fs::PermissionsExt;

        let base = tmp_dir("fake");
        let fake = base.join("fake_combine.sh");
        std::fs::write(
            &fake,
            "#!/usr/bin/env bash\necho \"   r :    +1.100   -0.100/+0.200 (68%)\"\necho \"   SF_c :    +0.900   -0.300/+0.300 (68%)\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let dir = base.join("cards/2018/catA/tau21_0p30");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(WORKSPACE), "").unwrap();
        std::fs::write(dir.join(COMBINE_SCRIPT), "echo combined > combined.txt\n").unwrap();

        assert_eq!(run_combine_cards(&base.join("cards"), &[]).unwrap(), 1);
        assert!(dir.join("combined.txt").is_file());

        let opts = FitOptions { combine: fake.display().to_string(), ..FitOptions::default() };
        let summary = base.join(ALL_FIT_RESULTS);
        let rows = fit_all(&base.join("cards"), &[], &opts, &summary).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category, "catA");
        assert!((rows[0].pois["r"].value - 1.1).abs() < 1e-12);

        let status: FitStatus =
            serde_json::from_str(&std::fs::read_to_string(dir.join(FIT_STATUS)).unwrap()).unwrap();
        assert_eq!(status.returncode, 0);
        assert_eq!(status.fit_root_file, "fitDiagnostics.catA.root");
        assert_eq!(status.combine_output, "higgsCombine.catA.FitDiagnostics.mH120.root");
        assert!(std::fs::read_to_string(&summary).unwrap().starts_with("year,category,cut,r,"));
        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn failing_script_stops_the_walk() {
        let base = tmp_dir("failing");
        let dir = base.join("2018/catA/tau21_0p30");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(COMBINE_SCRIPT), "exit 3\n").unwrap();
        let err = run_combine_cards(&base, &[]).unwrap_err().to_string();
        assert!(err.contains("exit code 3"), "{err}");
        let _ = std::fs::remove_dir_all(&base);
    }
}
