use std::fs::File;
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::KeyValue;
use tracing::info;

use crate::analysis::budget::AnalysisConfig;
use crate::analysis::cache::LruEquationCache;
use crate::engine::Engine;
use crate::report::build_report;
use crate::scan::scan_inputs;
use crate::telemetry::{Telemetry, with_span};

/// CLI arguments for bytecontract execution.
#[derive(Parser, Debug)]
#[command(
    name = "bytecontract",
    about = "Infers nullness, failure and purity contracts from JVM class files and JAR files.",
    version
)]
pub struct Cli {
    #[arg(long, value_name = "PATH")]
    pub input: PathBuf,
    #[arg(long, value_name = "PATH")]
    pub classpath: Vec<PathBuf>,
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,
    #[arg(long)]
    pub quiet: bool,
    #[arg(long)]
    pub timing: bool,
    /// OTLP HTTP collector endpoint for trace export.
    #[arg(long, value_name = "URL")]
    pub otel: Option<String>,
    /// Interpreter steps allowed per equation.
    #[arg(long, value_name = "N", default_value_t = AnalysisConfig::default().step_limit)]
    pub step_limit: usize,
    /// Keys one solve request may pull in.
    #[arg(long, value_name = "N", default_value_t = AnalysisConfig::default().key_limit)]
    pub key_limit: usize,
    /// Classes whose equations are kept in memory, keyed by content hash.
    #[arg(long, value_name = "N")]
    pub cache_capacity: Option<NonZeroUsize>,
}

impl Cli {
    fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            step_limit: self.step_limit,
            key_limit: self.key_limit,
            ..AnalysisConfig::default()
        }
    }
}

pub fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }
    let telemetry = cli.otel.clone().map(Telemetry::new).transpose()?;
    let result = analyze(&cli, telemetry.as_ref());
    if let Some(telemetry) = &telemetry {
        telemetry.shutdown()?;
    }
    result
}

fn analyze(cli: &Cli, telemetry: Option<&Telemetry>) -> Result<()> {
    let started_at = Instant::now();
    let scan_started_at = Instant::now();
    let scan = with_span(
        telemetry,
        "scan",
        &[KeyValue::new("bytecontract.phase", "scan")],
        || scan_inputs(&cli.input, &cli.classpath, telemetry),
    )?;
    let scan_duration_ms = scan_started_at.elapsed().as_millis();

    let config = cli.analysis_config();
    let mut engine = Engine::new(config);
    if let Some(capacity) = cli.cache_capacity {
        engine = engine.with_cache(Arc::new(LruEquationCache::new(capacity)));
    }
    let generate_started_at = Instant::now();
    let index = engine.generate(&scan.classes, telemetry);
    let generate_duration_ms = generate_started_at.elapsed().as_millis();

    let solve_started_at = Instant::now();
    let report = with_span(
        telemetry,
        "solve",
        &[
            KeyValue::new("bytecontract.phase", "solve"),
            KeyValue::new("bytecontract.targets", index.targets().len() as i64),
        ],
        || build_report(&index, &config, scan.class_count, scan.skipped),
    );
    let solve_duration_ms = solve_started_at.elapsed().as_millis();
    info!(
        "reported {} of {} analyzed members",
        report.members.len(),
        report.stats.analyzed_members
    );

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &report)
        .context("failed to serialize contract report")?;
    writer
        .write_all(b"\n")
        .context("failed to write contract report")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} generate_ms={} solve_ms={} classes={} members={}",
            started_at.elapsed().as_millis(),
            scan_duration_ms,
            generate_duration_ms,
            solve_duration_ms,
            scan.class_count,
            index.len()
        );
    }
    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}
