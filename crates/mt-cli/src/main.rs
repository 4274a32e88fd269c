//! mutag CLI

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

mod tools;

use mt_stat::combine::ALL_FIT_RESULTS;
use mt_stat::{DatacardOptions, FitOptions};

#[derive(Parser)]
#[command(name = "mutag")]
#[command(about = "mutag - boosted double-b tagger calibration on muon-enriched QCD")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the datasets of an analysis configuration
    Run {
        /// Analysis configuration (YAML, or JSON by extension)
        config: PathBuf,

        /// Output accumulator (gzipped when the name ends in .gz)
        #[arg(short, long, default_value = "output.json.gz")]
        output: PathBuf,

        /// Worker threads (configuration value when omitted)
        #[arg(long)]
        workers: Option<usize>,

        /// Files per dataset to process
        #[arg(long)]
        limit_files: Option<usize>,

        /// Chunks per file to process
        #[arg(long)]
        limit_chunks: Option<usize>,
    },

    /// Write pass/fail datacards and shapes from a saved output
    Datacards {
        /// Output accumulator of `run`
        #[arg(short, long)]
        input: PathBuf,

        /// Root of the card tree
        #[arg(short, long, default_value = "datacards")]
        output_dir: PathBuf,

        /// Template histogram
        #[arg(long, default_value = mt_stat::create::DEFAULT_VARIABLE)]
        variable: String,

        /// Periods (all periods of the output when omitted)
        #[arg(long, value_delimiter = ',')]
        years: Vec<String>,

        /// Shape nuisances read from histogram variations
        #[arg(long, value_delimiter = ',')]
        shape_systematics: Vec<String>,

        /// Do not emit autoMCStats
        #[arg(long)]
        no_mcstat: bool,

        /// Report file (pretty JSON). Defaults to stdout.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Run combine_cards.sh in every cut directory of a card tree
    CombineCards {
        /// Root of the card tree
        base: PathBuf,

        /// Template groups to enter (all when omitted)
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
    },

    /// Fit the workspace of one cut directory
    Fit {
        /// `{year}/{category}/{cut}` directory holding workspace.root
        cut_dir: PathBuf,

        #[command(flatten)]
        fit: FitArgs,
    },

    /// Fit and extract every cut directory of a card tree
    FitAll {
        /// Root of the card tree
        base: PathBuf,

        /// Template groups to enter (all when omitted)
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,

        /// Summary CSV (defaults to ALL_FIT_RESULTS.csv in the base directory)
        #[arg(long)]
        summary: Option<PathBuf>,

        #[command(flatten)]
        fit: FitArgs,
    },

    /// Parse fit logs into fitResults.json/csv
    ExtractResults {
        /// Cut directories
        #[arg(required = true)]
        cut_dirs: Vec<PathBuf>,

        /// Also write all rows into one CSV
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Derive the data/MC reweighting maps
    Reweighting {
        /// Output accumulator of a pt_reweighting run
        #[arg(short, long)]
        input: PathBuf,

        /// Directory receiving the correction files
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Histograms to derive maps from (all reweighting maps when omitted)
        #[arg(long, value_delimiter = ',')]
        hists: Vec<String>,

        /// Replace existing files
        #[arg(long)]
        overwrite: bool,
    },

    /// Quantiles of the leading-jet pT spectrum in data
    PtQuantiles {
        /// Output accumulator
        #[arg(short, long)]
        input: PathBuf,

        /// YAML output
        #[arg(short, long, default_value = "pt_quantiles.yaml")]
        output: PathBuf,

        /// Histogram
        #[arg(long, default_value = mt_stat::quantiles::DEFAULT_HIST)]
        hist: String,

        /// Data sample
        #[arg(long, default_value = mt_stat::quantiles::DEFAULT_SAMPLE)]
        sample: String,

        /// Category
        #[arg(long, default_value = mt_stat::quantiles::DEFAULT_CATEGORY)]
        category: String,

        /// Quantiles in [0, 1]
        #[arg(long, value_delimiter = ',', default_value = "0.34,0.67,1.0")]
        quantiles: Vec<f64>,
    },

    /// Trigger prescale tables
    Prescales {
        #[command(subcommand)]
        command: PrescaleCommands,
    },

    /// List the BTagMu trigger paths present in the event files
    Triggers {
        /// Dataset definition files
        #[arg(long, required = true, value_delimiter = ',')]
        datasets: Vec<PathBuf>,

        /// Periods to inspect
        #[arg(long, required = true, value_delimiter = ',')]
        years: Vec<String>,

        /// Paths to keep: ak4, ak8 or all
        #[arg(long, default_value = "all", value_parser = ["ak4", "ak8", "all"])]
        select: String,

        /// YAML output. Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Summarize the scale factors over the tau21 cuts
    SfSummary {
        /// Root of the fitted card tree
        base: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Scale factor: b or c
        #[arg(long, default_value = "b")]
        sf_type: mt_stat::SfType,

        /// Template groups to summarize (all when omitted)
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
    },

    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum PrescaleCommands {
    /// Statistics of the prescale factors by path and run
    Analyze {
        /// Prescale configuration listing the correction files
        #[arg(long)]
        config: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "prescale_analysis")]
        output_dir: PathBuf,

        /// Only this period
        #[arg(long)]
        year: Option<String>,

        /// Only this trigger group
        #[arg(long)]
        trigger_group: Option<String>,
    },

    /// Lumi-weighted average prescale per period, group and path
    Yaml {
        /// Prescale configuration listing the correction files
        #[arg(long)]
        config: PathBuf,

        /// YAML output
        #[arg(short, long, default_value = "average_prescales.yaml")]
        output: PathBuf,
    },
}

#[derive(clap::Args)]
struct FitArgs {
    /// combine executable
    #[arg(long, default_value = "combine")]
    combine: String,

    /// Skip the MultiDimFit pass
    #[arg(long)]
    no_multidimfit: bool,

    /// Extra argument passed to every combine call (repeatable)
    #[arg(long = "extra-arg", allow_hyphen_values = true)]
    extra_args: Vec<String>,
}

impl FitArgs {
    fn options(self) -> FitOptions {
        FitOptions { combine: self.combine, multidimfit: !self.no_multidimfit, extra_args: self.extra_args }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Run { config, output, workers, limit_files, limit_chunks } => {
            cmd_run(&config, &output, workers, limit_files, limit_chunks)
        }
        Commands::Datacards { input, output_dir, variable, years, shape_systematics, no_mcstat, report } => {
            let mut opts = DatacardOptions::new(output_dir);
            opts.variable = variable;
            opts.years = years;
            opts.shape_systematics = shape_systematics;
            opts.mcstat = !no_mcstat;
            cmd_datacards(&input, opts, report.as_ref())
        }
        Commands::CombineCards { base, categories } => {
            let ran = mt_stat::run_combine_cards(&base, &categories)?;
            tracing::info!(directories = ran, "combined cards");
            Ok(())
        }
        Commands::Fit { cut_dir, fit } => cmd_fit(&cut_dir, fit.options()),
        Commands::FitAll { base, categories, summary, fit } => {
            let summary = summary.unwrap_or_else(|| base.join(ALL_FIT_RESULTS));
            let rows = mt_stat::fit_all(&base, &categories, &fit.options(), &summary)?;
            write_json(None, serde_json::Value::Array(rows.iter().map(|r| r.to_json()).collect()))
        }
        Commands::ExtractResults { cut_dirs, summary } => cmd_extract(&cut_dirs, summary.as_deref()),
        Commands::Reweighting { input, output_dir, hists, overwrite } => {
            tools::cmd_reweighting(&input, &output_dir, hists, overwrite)
        }
        Commands::PtQuantiles { input, output, hist, sample, category, quantiles } => {
            tools::cmd_pt_quantiles(&input, &output, &hist, &sample, &category, &quantiles)
        }
        Commands::Prescales { command } => match command {
            PrescaleCommands::Analyze { config, output_dir, year, trigger_group } => {
                tools::cmd_prescales_analyze(&config, &output_dir, year.as_deref(), trigger_group.as_deref())
            }
            PrescaleCommands::Yaml { config, output } => tools::cmd_prescales_yaml(&config, &output),
        },
        Commands::Triggers { datasets, years, select, output } => {
            tools::cmd_triggers(&datasets, &years, &select, output.as_ref())
        }
        Commands::SfSummary { base, output_dir, sf_type, categories } => {
            tools::cmd_sf_summary(&base, &output_dir, sf_type, &categories)
        }
        Commands::Version => write_json(
            None,
            serde_json::json!({
                "tool": "mutag",
                "version": mt_core::VERSION,
            }),
        ),
    }
}

fn cmd_run(
    config: &Path,
    output: &Path,
    workers: Option<usize>,
    limit_files: Option<usize>,
    limit_chunks: Option<usize>,
) -> Result<()> {
    let mut cfg = mt_analysis::load_config(config)
        .with_context(|| format!("failed to load configuration {}", config.display()))?;
    if workers.is_some() {
        cfg.run_options.workers = workers;
    }
    if limit_files.is_some() {
        cfg.run_options.limit_files = limit_files;
    }
    if limit_chunks.is_some() {
        cfg.run_options.limit_chunks = limit_chunks;
    }
    let out = mt_analysis::run(&cfg)?;
    out.save(output).with_context(|| format!("failed to write {}", output.display()))?;
    write_json(
        None,
        serde_json::json!({
            "output": output.display().to_string(),
            "datasets": out.datasets_metadata.by_dataset.keys().collect::<Vec<_>>(),
            "histograms": out.variables.len(),
            "categories": out.cutflow.len(),
        }),
    )
}

fn cmd_datacards(input: &Path, mut opts: DatacardOptions, report: Option<&PathBuf>) -> Result<()> {
    let output = mt_analysis::Output::load(input).with_context(|| format!("failed to read {}", input.display()))?;
    opts.input = Some(input.to_path_buf());
    let rep = mt_stat::create_datacards(&output, &opts)?;
    write_json(report, serde_json::to_value(&rep)?)?;
    if rep.successful.is_empty() {
        bail!("no datacard written ({} failures)", rep.failed.len());
    }
    Ok(())
}

fn cmd_fit(cut_dir: &Path, opts: FitOptions) -> Result<()> {
    let status = mt_stat::run_fit(cut_dir, &opts)?;
    write_json(None, serde_json::to_value(&status)?)?;
    if !status.succeeded() {
        bail!("FitDiagnostics exited with code {}", status.returncode);
    }
    Ok(())
}

fn cmd_extract(cut_dirs: &[PathBuf], summary: Option<&Path>) -> Result<()> {
    let mut rows = Vec::with_capacity(cut_dirs.len());
    for dir in cut_dirs {
        rows.push(
            mt_stat::extract_fit_results(dir).with_context(|| format!("failed to extract {}", dir.display()))?,
        );
    }
    if let Some(path) = summary {
        mt_stat::fit_results::write_rows_csv(path, &rows)?;
    }
    write_json(None, serde_json::Value::Array(rows.iter().map(|r| r.to_json()).collect()))
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
