//! KCAD 命令行入口
//!
//! - `kcad convert`：EGRN 摘录 → 校验、转换、规整 → DXF 或 MIF/MID
//! - `kcad zones`：列出分区表
//! - `kcad styles`：输出图层样式参数（JSON）

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use kcad_core::crs::ZoneTable;
use kcad_core::issue::Verdict;
use kcad_core::layer::StyleTable;
use kcad_file::OutputFormat;
use kcad_pipeline::{CancellationToken, DirectorySink, Pipeline, PipelineConfig};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "kcad", version, about = "Cadastral extract to CAD drawing converter")]
struct Cli {
    /// 日志详细程度（-v debug，-vv trace）
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert an EGRN XML extract into a drawing
    Convert(ConvertArgs),
    /// List the coordinate zone table
    Zones {
        /// Zone table JSON replacing the built-in table
        #[arg(long)]
        zone_table: Option<PathBuf>,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the layer style parameters as JSON
    Styles,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// EGRN XML file, or "-" for stdin
    input: PathBuf,

    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Output file name without extension (defaults to the input file stem)
    #[arg(long)]
    name: Option<String>,

    /// dxf or tab
    #[arg(long, value_parser = parse_format)]
    format: Option<OutputFormat>,

    #[arg(long)]
    source_crs: Option<String>,

    #[arg(long)]
    target_crs: Option<String>,

    /// Source encoding (utf-8, windows-1251, ...)
    #[arg(long)]
    encoding: Option<String>,

    /// Pipeline configuration JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Diagnostics report path (defaults to <output>/<name>.report.json)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Distance tolerance in metres
    #[arg(long)]
    tolerance: Option<f64>,

    /// Treat boundary gaps and overlaps as blocking
    #[arg(long)]
    adjacency_blocking: bool,

    /// Fail the run on any advisory issue
    #[arg(long)]
    warnings_blocking: bool,

    /// Re-read the written DXF and compare coordinates
    #[arg(long)]
    verify: bool,
}

fn parse_format(text: &str) -> std::result::Result<OutputFormat, String> {
    OutputFormat::parse(text).ok_or_else(|| format!("unknown output format '{}'", text))
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .finish(),
    )?;
    Ok(())
}

fn build_config(args: &ConvertArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(format) = args.format {
        config.output_format = format;
    }
    if let Some(crs) = &args.source_crs {
        config.source_crs = Some(crs.clone());
    }
    if let Some(crs) = &args.target_crs {
        config.target_crs = Some(crs.clone());
    }
    if let Some(encoding) = &args.encoding {
        config.source_encoding = Some(encoding.clone());
    }
    if let Some(tolerance) = args.tolerance {
        config.tolerance_m = tolerance;
    }
    config.treat_adjacency_as_blocking |= args.adjacency_blocking;
    config.treat_warnings_as_blocking |= args.warnings_blocking;
    config.verify_dxf |= args.verify;
    Ok(config)
}

fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(std::io::stdin().lock()));
    }
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

fn convert(args: ConvertArgs) -> Result<i32> {
    let config = build_config(&args)?;
    let pipeline = Pipeline::new(config).context("invalid configuration")?;

    let stem = args.name.clone().unwrap_or_else(|| {
        args.input
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| *s != "-")
            .unwrap_or("cadastre")
            .to_string()
    });
    let mut sink = DirectorySink::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;

    let outcome = {
        let input = open_input(&args.input)?;
        pipeline.run(input, &stem, &mut sink, &CancellationToken::new())
    };

    let report_path = args
        .report
        .unwrap_or_else(|| args.output.join(format!("{}.report.json", stem)));
    std::fs::write(&report_path, outcome.report.to_json()?)
        .with_context(|| format!("failed to write {}", report_path.display()))?;

    let report = &outcome.report;
    let invalid = report
        .parcels
        .iter()
        .filter(|p| p.verdict == Verdict::Invalid)
        .count();
    println!(
        "{}: {} parcels, {} exported, {} invalid, {} parse issues",
        report.final_state,
        report.parcels.len(),
        report.exported_count(),
        invalid,
        report.parse_issues.len()
    );
    for path in sink.paths() {
        println!("  {}", path.display());
    }
    if let Some(failure) = &report.failure {
        println!("failure: {}", failure);
    }
    println!("report: {}", report_path.display());
    Ok(outcome.exit_code)
}

fn zones(zone_table: Option<PathBuf>, json: bool) -> Result<i32> {
    let loaded;
    let table = match zone_table {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            loaded = ZoneTable::from_json(&text)?;
            &loaded
        }
        None => ZoneTable::builtin(),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(table.entries())?);
        return Ok(0);
    }
    for entry in table.entries() {
        let p = &entry.projection;
        println!(
            "МСК-{} зона {}\tlat_0={} lon_0={} k_0={} FE={} FN={}",
            entry.region, entry.zone, p.lat_0, p.lon_0, p.k_0, p.false_easting, p.false_northing
        );
    }
    println!("СК-42 зона 1..60\tGauss-Krüger 6° zones");
    println!("WGS84\tgeodetic");
    Ok(0)
}

fn styles() -> Result<i32> {
    let table = StyleTable::standard();
    println!("{}", serde_json::to_string_pretty(table.layers())?);
    Ok(0)
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Convert(args) => convert(args),
        Command::Zones { zone_table, json } => zones(zone_table, json),
        Command::Styles => styles(),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("failed to initialize logging: {}", e);
    }
    info!("Starting KCAD...");

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            2
        }
    };
    std::process::exit(code);
}
