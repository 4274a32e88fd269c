//! Combine datacards for one template category.
//!
//! A [`Datacard`] sums the category's templates over the subsamples and
//! datasets of each process and year, then renders the text card and the
//! matching ROOT shapes. [`DatacardMutag`] replaces the free rate parameters
//! of the fail region with expressions that move events between the pass
//! and fail regions while keeping their sum fixed.

use std::collections::BTreeMap;
use std::path::Path;

use mt_analysis::Hist;
use mt_analysis::output::DatasetsMetadata;
use mt_core::{Error, Result};

use crate::rootio::{RootFileWriter, Th1d};

/// Subsample → dataset → histogram, one entry of the run output's variables.
pub type Histograms = BTreeMap<String, BTreeMap<String, Hist>>;

/// `{process}_{year}` → pass/fail yield ratio.
pub type PassFailRatios = BTreeMap<String, f64>;

const SYST_COLUMN: usize = 30;
const COLUMN: usize = 20;
const LINESEP: &str = "\n";

fn section_sep() -> String {
    "-".repeat(80)
}

fn pad(s: &str, width: usize) -> String {
    format!("{s:<width$}")
}

/// A simulated process made of one or more subsamples.
#[derive(Debug, Clone, PartialEq)]
pub struct McProcess {
    /// Process name (`light`, `c`, `b`)
    pub name: String,
    /// Subsamples summed into the process
    pub samples: Vec<String>,
    /// Signal processes get non-positive indices
    pub is_signal: bool,
    /// Whether the card floats the process normalization
    pub has_rate_param: bool,
}

/// Observed data made of one or more subsamples.
#[derive(Debug, Clone, PartialEq)]
pub struct DataProcess {
    /// Name of the data histogram (`data_obs`)
    pub name: String,
    /// Subsamples summed into the observation
    pub samples: Vec<String>,
}

/// Type of a nuisance parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SystematicKind {
    /// Log-normal normalization effect with the given κ
    LnN(f64),
    /// Template morphing from the `{name}Up`/`{name}Down` variations
    Shape,
}

/// A nuisance parameter and the processes it acts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Systematic {
    /// Nuisance name; shape nuisances also name the histogram variations
    pub name: String,
    /// lnN or shape
    pub kind: SystematicKind,
    /// Affected process names
    pub processes: Vec<String>,
}

impl Systematic {
    /// Log-normal nuisance.
    pub fn lnn(name: &str, value: f64, processes: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind: SystematicKind::LnN(value),
            processes: processes.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Shape nuisance.
    pub fn shape(name: &str, processes: &[&str]) -> Self {
        Self { name: name.into(), kind: SystematicKind::Shape, processes: processes.iter().map(|p| p.to_string()).collect() }
    }

    fn type_label(&self) -> &'static str {
        match self.kind {
            SystematicKind::LnN(_) => "lnN",
            SystematicKind::Shape => "shape",
        }
    }

    fn column_value(&self, process: &str) -> String {
        if !self.processes.iter().any(|p| p == process) {
            return "-".into();
        }
        match self.kind {
            SystematicKind::LnN(v) => v.to_string(),
            SystematicKind::Shape => "1".into(),
        }
    }
}

/// What a card is built from besides the histograms.
#[derive(Debug, Clone, PartialEq)]
pub struct CardLayout {
    /// Template category
    pub category: String,
    /// Data-taking periods in the card
    pub years: Vec<String>,
    /// Simulated processes
    pub mc_processes: Vec<McProcess>,
    /// Observed data
    pub data_processes: Vec<DataProcess>,
    /// Nuisance parameters
    pub systematics: Vec<Systematic>,
    /// Prepended to the bin name
    pub bin_prefix: Option<String>,
    /// Appended to the bin name
    pub bin_suffix: Option<String>,
    /// Emit `autoMCStats`
    pub mcstat: bool,
}

/// One column of the expectation block.
#[derive(Debug, Clone)]
struct Column {
    process: String,
    year: String,
    index: i32,
    nominal: Th1d,
}

impl Column {
    fn label(&self) -> String {
        format!("{}_{}", self.process, self.year)
    }
}

/// A datacard with its templates already summed.
#[derive(Debug, Clone)]
pub struct Datacard {
    layout: CardLayout,
    columns: Vec<Column>,
    shape_variations: Vec<Th1d>,
    data: Option<Th1d>,
}

/// Σ over subsamples and datasets of `year` of one category slice.
/// Slices lacking `variation` contribute their nominal content.
fn sum_templates(
    histograms: &Histograms,
    metadata: &DatasetsMetadata,
    samples: &[String],
    year: &str,
    category: &str,
    variation: &str,
    name: &str,
) -> Result<Option<Th1d>> {
    let mut total: Option<Th1d> = None;
    for sample in samples {
        let Some(by_dataset) = histograms.get(sample) else {
            continue;
        };
        for (dataset, hist) in by_dataset {
            if metadata.by_dataset.get(dataset).is_none_or(|m| m.year != year) {
                continue;
            }
            let var = if hist.get(category, variation).is_some() { variation } else { "nominal" };
            let th = Th1d::from_hist(name, hist, category, var)?;
            match total.as_mut() {
                Some(t) => t.accumulate(&th)?,
                None => total = Some(th),
            }
        }
    }
    Ok(total)
}

impl Datacard {
    /// Sum the templates of every process, year and shape variation.
    pub fn new(histograms: &Histograms, metadata: &DatasetsMetadata, layout: CardLayout) -> Result<Self> {
        if layout.mc_processes.is_empty() {
            return Err(Error::Validation("a datacard needs at least one simulated process".into()));
        }
        if layout.years.is_empty() {
            return Err(Error::Validation(format!("datacard '{}' has no data-taking period", layout.category)));
        }
        let cat = layout.category.as_str();

        let mut columns = Vec::new();
        let mut shape_variations = Vec::new();
        let signals = layout.mc_processes.iter().filter(|p| p.is_signal);
        let backgrounds = layout.mc_processes.iter().filter(|p| !p.is_signal);
        let (mut next_signal, mut next_background) = (0, 1);
        for process in signals.chain(backgrounds) {
            for year in &layout.years {
                let label = format!("{}_{}", process.name, year);
                let nominal = sum_templates(histograms, metadata, &process.samples, year, cat, "nominal", &label)?
                    .ok_or_else(|| {
                        Error::Validation(format!("no templates for process '{}' in {year} ({cat})", process.name))
                    })?;
                for syst in layout.systematics.iter().filter(|s| s.kind == SystematicKind::Shape) {
                    if !syst.processes.contains(&process.name) {
                        continue;
                    }
                    for dir in ["Up", "Down"] {
                        let variation = format!("{}{dir}", syst.name);
                        let shape_name = format!("{label}_{variation}");
                        if let Some(t) =
                            sum_templates(histograms, metadata, &process.samples, year, cat, &variation, &shape_name)?
                        {
                            shape_variations.push(t);
                        }
                    }
                }
                let index = if process.is_signal {
                    let i = next_signal;
                    next_signal -= 1;
                    i
                } else {
                    let i = next_background;
                    next_background += 1;
                    i
                };
                columns.push(Column { process: process.name.clone(), year: year.clone(), index, nominal });
            }
        }

        let mut data: Option<Th1d> = None;
        for process in &layout.data_processes {
            for year in &layout.years {
                if let Some(t) = sum_templates(histograms, metadata, &process.samples, year, cat, "nominal", &process.name)? {
                    match data.as_mut() {
                        Some(d) => d.accumulate(&t)?,
                        None => data = Some(t),
                    }
                }
            }
        }

        tracing::debug!(category = %cat, processes = columns.len(), has_data = data.is_some(), "built datacard");
        Ok(Self { layout, columns, shape_variations, data })
    }

    /// Category of the card.
    pub fn category(&self) -> &str {
        &self.layout.category
    }

    /// Bin name: the category with `-` replaced by `_`, plus prefix and suffix.
    pub fn bin(&self) -> String {
        let mut bin = self.layout.category.replace('-', "_");
        if let Some(p) = &self.layout.bin_prefix {
            bin = format!("{p}_{bin}");
        }
        if let Some(s) = &self.layout.bin_suffix {
            bin = format!("{bin}_{s}");
        }
        bin
    }

    /// Whether observed data contributed.
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Observed yield (0 without data).
    pub fn observation(&self) -> f64 {
        self.data.as_ref().map_or(0.0, Th1d::integral)
    }

    /// `{process}_{year}` → expected yield.
    pub fn rates(&self) -> BTreeMap<String, f64> {
        self.columns.iter().map(|c| (c.label(), c.nominal.integral())).collect()
    }

    /// Simulated processes with a floating normalization, paired with their year.
    fn rate_param_targets(&self) -> impl Iterator<Item = (&McProcess, &String)> {
        self.layout
            .mc_processes
            .iter()
            .filter(|p| p.has_rate_param)
            .flat_map(|p| self.layout.years.iter().map(move |y| (p, y)))
    }

    fn rate_param_name(process: &McProcess) -> String {
        if process.is_signal { "r".to_string() } else { format!("SF_{}", process.name) }
    }

    fn preamble(&self) -> String {
        let mut s = format!("# Datacard for category {}{LINESEP}", self.layout.category);
        s += &format!("imax 1 number of bins{LINESEP}");
        s += &format!("jmax {} number of background processes{LINESEP}", self.columns.len() - 1);
        s += &format!("kmax {} number of nuisance parameters{LINESEP}", self.layout.systematics.len());
        s
    }

    fn shape_section(&self, shapes_file: &str) -> String {
        format!("shapes * {} {shapes_file} $PROCESS $PROCESS_$SYSTEMATIC{LINESEP}", self.bin())
    }

    fn observation_section(&self) -> String {
        let mut s = pad("bin", SYST_COLUMN + COLUMN) + &self.bin() + LINESEP;
        s += &(pad("observation", SYST_COLUMN + COLUMN) + &format!("{:.4}", self.observation()) + LINESEP);
        s
    }

    fn expectation_section(&self) -> String {
        let bin = self.bin();
        let row = |label: &str, cells: Vec<String>| {
            let mut line = pad(label, SYST_COLUMN + COLUMN);
            for c in cells {
                line += &pad(&c, COLUMN);
            }
            line.trim_end().to_string() + LINESEP
        };
        let mut s = row("bin", self.columns.iter().map(|_| bin.clone()).collect());
        s += &row("process", self.columns.iter().map(Column::label).collect());
        s += &row("process", self.columns.iter().map(|c| c.index.to_string()).collect());
        s += &row("rate", self.columns.iter().map(|c| format!("{:.4}", c.nominal.integral())).collect());
        s
    }

    fn systematics_section(&self) -> String {
        let mut s = String::new();
        for syst in &self.layout.systematics {
            let mut line = pad(&syst.name, SYST_COLUMN) + &pad(syst.type_label(), COLUMN);
            for c in &self.columns {
                line += &pad(&syst.column_value(&c.process), COLUMN);
            }
            s += line.trim_end();
            s += LINESEP;
        }
        s
    }

    /// Free normalizations: `SF_{p} rateParam * {p}_{year} 1 [0,5]`.
    pub fn rate_parameters_section(&self) -> String {
        let mut s = String::new();
        for (process, year) in self.rate_param_targets() {
            let name = Self::rate_param_name(process);
            let line = pad(&name, SYST_COLUMN)
                + &pad("rateParam", COLUMN)
                + &format!("* {}_{year} 1 [0,5]", process.name);
            s += &line;
            s += LINESEP;
        }
        s
    }

    fn mcstat_section(&self) -> String {
        format!("{} autoMCStats 0 1 1{LINESEP}", self.bin())
    }

    fn render(&self, shapes_file: &str, rate_params: &str) -> String {
        let sep = section_sep() + LINESEP;
        let mut s = self.preamble() + &sep;
        s += &self.shape_section(shapes_file);
        s += &sep;
        s += &self.observation_section();
        s += &sep;
        s += &self.expectation_section();
        s += &sep;
        s += &self.systematics_section();
        s += &sep;
        s += rate_params;
        s += &sep;
        if self.layout.mcstat {
            s += &self.mcstat_section();
            s += &sep;
        }
        s
    }

    /// Card text referencing `shapes_file`.
    pub fn content(&self, shapes_file: &str) -> String {
        self.render(shapes_file, &self.rate_parameters_section())
    }

    /// Shape histograms: data first, then nominal and varied templates.
    pub fn shape_histograms(&self) -> Vec<&Th1d> {
        self.data
            .iter()
            .chain(self.columns.iter().map(|c| &c.nominal))
            .chain(self.shape_variations.iter())
            .collect()
    }

    fn write_files(&self, dir: &Path, card_name: &str, shapes_name: &str, content: &str) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io_at(dir, e))?;
        let card = dir.join(card_name);
        std::fs::write(&card, content).map_err(|e| Error::io_at(&card, e))?;
        let mut shapes = RootFileWriter::new();
        for h in self.shape_histograms() {
            shapes.add(h.clone())?;
        }
        shapes.write(&dir.join(shapes_name))?;
        tracing::info!(card = %card.display(), shapes = shapes.len(), "wrote datacard");
        Ok(())
    }

    /// Write `card_name` and `shapes_name` into `dir`.
    pub fn dump(&self, dir: &Path, card_name: &str, shapes_name: &str) -> Result<()> {
        self.write_files(dir, card_name, shapes_name, &self.content(shapes_name))
    }
}

/// Format like `%.{sig}g`: shortest of fixed and scientific, trailing zeros dropped.
pub fn format_sig(x: f64, sig: usize) -> String {
    if x == 0.0 {
        return "0".into();
    }
    if x.is_nan() {
        return "nan".into();
    }
    if x.is_infinite() {
        return if x < 0.0 { "-inf".into() } else { "inf".into() };
    }
    let sig = sig.max(1);
    let sci = format!("{:.*e}", sig - 1, x);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let trim = |s: &str| -> String {
        if s.contains('.') { s.trim_end_matches('0').trim_end_matches('.').to_string() } else { s.to_string() }
    };
    if exp < -4 || exp >= sig as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim(mantissa), exp.abs())
    } else {
        let decimals = (sig as i32 - 1 - exp).max(0) as usize;
        trim(&format!("{x:.decimals$}"))
    }
}

/// A [`Datacard`] whose fail-region normalizations follow the pass region.
///
/// With `SF` the pass-region factor and `R` the pass/fail yield ratio, the
/// fail region is scaled by `1 + (1 − SF)·R`, so the pass+fail total is
/// unchanged.
#[derive(Debug, Clone)]
pub struct DatacardMutag {
    card: Datacard,
    passfail: Option<PassFailRatios>,
}

impl DatacardMutag {
    /// Pass cards take `None`; fail cards take the ratios of their pass partner.
    pub fn new(card: Datacard, passfail: Option<PassFailRatios>) -> Self {
        Self { card, passfail }
    }

    /// Underlying card.
    pub fn card(&self) -> &Datacard {
        &self.card
    }

    /// Expression scaling `{process}_{year}` in the fail region.
    pub fn passfail_formula(&self, process: &McProcess, year: &str) -> Result<String> {
        let key = format!("{}_{year}", process.name);
        let ratio = self
            .passfail
            .as_ref()
            .and_then(|r| r.get(&key))
            .ok_or_else(|| Error::Validation(format!("pass/fail ratio for '{key}' not found")))?;
        Ok(format!("(((1-@0)*{})+1)", format_sig(*ratio, 6)))
    }

    /// Rate parameters: free factors in pass cards, pass-linked expressions in fail cards.
    pub fn rate_parameters_section(&self) -> Result<String> {
        if self.passfail.is_none() {
            return Ok(self.card.rate_parameters_section());
        }
        let mut s = String::new();
        for (process, year) in self.card.rate_param_targets() {
            let name = Datacard::rate_param_name(process);
            let formula = self.passfail_formula(process, year)?;
            // `{name}_fail` keeps the fail parameter distinct from the pass-card `{name}` it depends on
            let line = pad(&format!("{name}_fail"), SYST_COLUMN)
                + &pad("rateParam", COLUMN)
                + &format!("* {}_{year} {formula} {name}", process.name);
            s += &line;
            s += LINESEP;
        }
        Ok(s)
    }

    /// Card text referencing `shapes_file`.
    pub fn content(&self, shapes_file: &str) -> Result<String> {
        Ok(self.card.render(shapes_file, &self.rate_parameters_section()?))
    }

    /// Write the card and its shapes into `dir`.
    pub fn dump(&self, dir: &Path, card_name: &str, shapes_name: &str) -> Result<()> {
        let content = self.content(shapes_name)?;
        self.card.write_files(dir, card_name, shapes_name, &content)
    }
}

/// Σ pass yield / Σ fail yield per `{process}_{year}`; processes without
/// fail yield are left out.
pub fn passfail_ratio(pass: &Datacard, fail: &Datacard) -> PassFailRatios {
    let fail_rates = fail.rates();
    pass.rates()
        .into_iter()
        .filter_map(|(key, p)| {
            let f = *fail_rates.get(&key)?;
            (f != 0.0).then(|| (key, p / f))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mt_analysis::{Binning, HistAxis};

    pub(crate) const PASS: &str = "msd-80to170_Pt-350toInf_particleNet_XbbVsQCD-L_tau21_0p30_pass";
    pub(crate) const FAIL: &str = "msd-80to170_Pt-350toInf_particleNet_XbbVsQCD-L_tau21_0p30_fail";

    fn hist(fills: &[(&str, &str, f64, f64)]) -> Hist {
        let mut h = Hist::new(vec![HistAxis {
            name: "FatJetGood_logsumcorrSVmass".into(),
            label: "log".into(),
            binning: Binning::Regular { bins: 2, start: 0.0, stop: 2.0 },
        }]);
        for (cat, var, x, w) in fills {
            h.fill(cat, var, &[*x], *w).unwrap();
        }
        h
    }

    /// Pass region: light 4, c 2, b 6 (+ pileupUp on b); fail: light 8, c 2, b 2; data 12 / 12.
    pub(crate) fn fixture() -> (Histograms, DatasetsMetadata) {
        let mut metadata = DatasetsMetadata::default();
        for (ds, sample, year, is_mc) in [
            ("QCD_2018", "QCD", "2018", true),
            ("QCD_2017", "QCD", "2017", true),
            ("DATA_2018A", "DATA_BTagMu", "2018", false),
        ] {
            let md = serde_json::from_value(serde_json::json!({
                "sample": sample, "year": year, "isMC": is_mc,
            }))
            .unwrap();
            metadata.by_dataset.insert(ds.into(), md);
            metadata
                .by_datataking_period
                .entry(year.into())
                .or_default()
                .entry(sample.into())
                .or_default()
                .insert(ds.into());
        }
        let mut h = Histograms::new();
        let mut put = |sub: &str, ds: &str, hh: Hist| {
            h.entry(sub.to_string()).or_default().insert(ds.to_string(), hh);
        };
        put("QCD_l", "QCD_2018", hist(&[(PASS, "nominal", 0.5, 4.0), (FAIL, "nominal", 0.5, 8.0)]));
        put("QCD_c", "QCD_2018", hist(&[(PASS, "nominal", 1.5, 1.0), (FAIL, "nominal", 1.5, 1.0)]));
        put("QCD_cc", "QCD_2018", hist(&[(PASS, "nominal", 1.5, 1.0), (FAIL, "nominal", 1.5, 1.0)]));
        put(
            "QCD_b",
            "QCD_2018",
            hist(&[(PASS, "nominal", 1.5, 6.0), (PASS, "pileupUp", 1.5, 7.0), (FAIL, "nominal", 1.5, 2.0)]),
        );
        // another year must not leak in
        put("QCD_b", "QCD_2017", hist(&[(PASS, "nominal", 1.5, 100.0)]));
        put("DATA_BTagMu", "DATA_2018A", hist(&[(PASS, "nominal", 0.5, 12.0), (FAIL, "nominal", 0.5, 12.0)]));
        (h, metadata)
    }

    pub(crate) fn layout(category: &str, systematics: Vec<Systematic>) -> CardLayout {
        let mc = |name: &str, samples: &[&str], is_signal: bool, has_rate_param: bool| McProcess {
            name: name.into(),
            samples: samples.iter().map(|s| s.to_string()).collect(),
            is_signal,
            has_rate_param,
        };
        CardLayout {
            category: category.into(),
            years: vec!["2018".into()],
            mc_processes: vec![
                mc("light", &["QCD_l"], false, true),
                mc("c", &["QCD_c", "QCD_cc"], false, true),
                mc("b", &["QCD_b"], true, false),
            ],
            data_processes: vec![DataProcess { name: "data_obs".into(), samples: vec!["DATA_BTagMu".into()] }],
            systematics,
            bin_prefix: None,
            bin_suffix: None,
            mcstat: true,
        }
    }

    #[test]
    fn rates_sum_subsamples_of_the_year() {
        let (h, md) = fixture();
        let card = Datacard::new(&h, &md, layout(PASS, vec![])).unwrap();
        let rates = card.rates();
        assert_relative_eq!(rates["light_2018"], 4.0);
        assert_relative_eq!(rates["c_2018"], 2.0);
        assert_relative_eq!(rates["b_2018"], 6.0);
        assert_relative_eq!(card.observation(), 12.0);
        assert_eq!(card.bin(), "msd_80to170_Pt_350toInf_particleNet_XbbVsQCD_L_tau21_0p30_pass");
    }

    #[test]
    fn card_text_layout() {
        let (h, md) = fixture();
        let systs =
            vec![Systematic::lnn("lumi", 1.025, &["light", "c", "b"]), Systematic::lnn("c_norm", 1.15, &["c"])];
        let card = Datacard::new(&h, &md, layout(PASS, systs)).unwrap();
        let text = card.content("shapes.root");
        let bin = card.bin();
        assert!(text.contains("imax 1"));
        assert!(text.contains("jmax 2"));
        assert!(text.contains("kmax 2"));
        assert!(text.contains(&format!("shapes * {bin} shapes.root $PROCESS $PROCESS_$SYSTEMATIC")));
        // signal first with index 0
        let process_rows: Vec<&str> = text.lines().filter(|l| l.starts_with("process")).collect();
        let names: Vec<&str> = process_rows[0].split_whitespace().skip(1).collect();
        assert_eq!(names, ["b_2018", "light_2018", "c_2018"]);
        let idx: Vec<&str> = process_rows[1].split_whitespace().skip(1).collect();
        assert_eq!(idx, ["0", "1", "2"]);
        let c_norm: Vec<&str> = text.lines().find(|l| l.starts_with("c_norm")).unwrap().split_whitespace().collect();
        assert_eq!(c_norm, ["c_norm", "lnN", "-", "-", "1.15"]);
        assert!(text.lines().any(|l| l.split_whitespace().collect::<Vec<_>>()
            == ["SF_light", "rateParam", "*", "light_2018", "1", "[0,5]"]));
        assert!(!text.contains("SF_b"));
        assert!(text.contains(&format!("{bin} autoMCStats 0 1 1")));
    }

    #[test]
    fn fail_card_links_to_pass_factors() {
        let (h, md) = fixture();
        let pass = Datacard::new(&h, &md, layout(PASS, vec![])).unwrap();
        let fail = Datacard::new(&h, &md, layout(FAIL, vec![])).unwrap();
        let ratios = passfail_ratio(&pass, &fail);
        assert_relative_eq!(ratios["light_2018"], 0.5);
        assert_relative_eq!(ratios["c_2018"], 1.0);
        assert_relative_eq!(ratios["b_2018"], 3.0);

        let card = DatacardMutag::new(fail.clone(), Some(ratios));
        let text = card.content("shapes.root").unwrap();
        let line: Vec<&str> = text.lines().find(|l| l.starts_with("SF_light_fail")).unwrap().split_whitespace().collect();
        assert_eq!(line, ["SF_light_fail", "rateParam", "*", "light_2018", "(((1-@0)*0.5)+1)", "SF_light"]);
        assert!(text.contains("(((1-@0)*1)+1) SF_c"));

        let missing = DatacardMutag::new(fail, Some(PassFailRatios::new()));
        let err = missing.content("shapes.root").unwrap_err().to_string();
        assert!(err.contains("light_2018"), "{err}");
    }

    #[test]
    fn shape_systematics_fall_back_to_nominal() {
        let (h, md) = fixture();
        let card = Datacard::new(&h, &md, layout(PASS, vec![Systematic::shape("pileup", &["b", "c"])])).unwrap();
        let shapes = card.shape_histograms();
        let by_name: BTreeMap<&str, f64> = shapes.iter().map(|t| (t.name.as_str(), t.integral())).collect();
        assert_relative_eq!(by_name["data_obs"], 12.0);
        assert_relative_eq!(by_name["b_2018_pileupUp"], 7.0);
        assert_relative_eq!(by_name["b_2018_pileupDown"], 6.0);
        assert_relative_eq!(by_name["c_2018_pileupUp"], 2.0);
        assert!(!by_name.contains_key("light_2018_pileupUp"));
        let text = card.content("shapes.root");
        let row: Vec<&str> = text.lines().find(|l| l.starts_with("pileup")).unwrap().split_whitespace().collect();
        assert_eq!(row, ["pileup", "shape", "1", "-", "1"]);
    }

    #[test]
    fn missing_process_is_an_error() {
        let (h, md) = fixture();
        let mut l = layout(PASS, vec![]);
        l.years = vec!["2016".into()];
        assert!(Datacard::new(&h, &md, l).is_err());
    }

    #[test]
    fn significant_digit_formatting() {
        assert_eq!(format_sig(0.8, 6), "0.8");
        assert_eq!(format_sig(1.0, 6), "1");
        assert_eq!(format_sig(1.0 / 3.0, 6), "0.333333");
        assert_eq!(format_sig(1234567.0, 6), "1.23457e+06");
        assert_eq!(format_sig(0.00001234, 6), "1.234e-05");
        assert_eq!(format_sig(0.0, 6), "0");
    }
}
