use std::env;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use kestrel_tasks::script_harness::{load_fixture, run_fixture, HarnessOutput};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();
    if let Err(err) = run() {
        eprintln!("[script-harness] error: {err:?}");
        std::process::exit(1);
    }
}

#[derive(Default)]
struct ReplayArgs {
    fixture: Option<PathBuf>,
    steps: Option<usize>,
    speed: Option<f32>,
    summary: bool,
    write_output: Option<PathBuf>,
    golden: Option<PathBuf>,
}

fn run() -> Result<()> {
    let args = parse_args(env::args().skip(1))?;
    let fixture_path = args.fixture.clone().ok_or_else(|| anyhow!("--fixture <path> is required"))?;
    let mut fixture = load_fixture(&fixture_path)?;
    if let Some(steps) = args.steps {
        fixture.steps = steps;
    }
    if let Some(speed) = args.speed {
        fixture.speed_factor = speed;
    }
    let output = run_fixture(&fixture).with_context(|| format!("replaying {}", fixture_path.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.summary {
        write_summary(&mut out, &output)?;
    }
    if let Some(path) = &args.write_output {
        write_output(path, &output)?;
        writeln!(out, "[script-harness] wrote {}", path.display())?;
    }
    if let Some(path) = &args.golden {
        let file = File::open(path).with_context(|| format!("opening golden file '{}'", path.display()))?;
        let expected: HarnessOutput = serde_json::from_reader(file).with_context(|| "parsing golden JSON")?;
        if let Some(step) = first_divergence(&expected, &output) {
            bail!("replay of {} diverges from {} at step {step}", fixture_path.display(), path.display());
        }
        writeln!(out, "[script-harness] matched golden {}", path.display())?;
    }
    if !args.summary && args.write_output.is_none() && args.golden.is_none() {
        serde_json::to_writer_pretty(&mut out, &output)?;
        writeln!(out)?;
    }
    Ok(())
}

fn parse_args(mut raw: impl Iterator<Item = String>) -> Result<ReplayArgs> {
    let mut args = ReplayArgs::default();
    while let Some(flag) = raw.next() {
        let mut value = || raw.next().ok_or_else(|| anyhow!("{flag} expects a value"));
        match flag.as_str() {
            "--fixture" | "-f" => args.fixture = Some(PathBuf::from(value()?)),
            "--steps" | "-n" => args.steps = Some(value()?.parse().context("--steps expects an integer")?),
            "--speed" | "-s" => args.speed = Some(value()?.parse().context("--speed expects a number")?),
            "--write-output" | "-o" => args.write_output = Some(PathBuf::from(value()?)),
            "--golden" | "-g" => args.golden = Some(PathBuf::from(value()?)),
            "--summary" => args.summary = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => bail!("unknown argument '{other}'"),
        }
    }
    Ok(args)
}

/// One line per log or event, prefixed with the step and frame it happened on.
fn write_summary(out: &mut impl Write, output: &HarnessOutput) -> Result<()> {
    for result in &output.results {
        for line in &result.logs {
            writeln!(out, "{:>4} f{:<5} log   {line}", result.step, result.frame)?;
        }
        for event in &result.events {
            writeln!(out, "{:>4} f{:<5} event {event}", result.step, result.frame)?;
        }
    }
    writeln!(
        out,
        "-- {} steps, {} live task(s), input {}",
        output.steps,
        output.live_tasks,
        if output.final_input_active { "active" } else { "locked" }
    )?;
    for (name, value) in &output.globals {
        writeln!(out, "   {name} = {value}")?;
    }
    Ok(())
}

fn write_output(path: &Path, output: &HarnessOutput) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating output directory '{}'", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("writing replay output to '{}'", path.display()))?;
    serde_json::to_writer_pretty(file, output).with_context(|| "serializing replay output")
}

/// Step of the first differing result, or the step count when only the
/// final state differs.
fn first_divergence(expected: &HarnessOutput, actual: &HarnessOutput) -> Option<usize> {
    if expected == actual {
        return None;
    }
    let step = expected
        .results
        .iter()
        .zip(&actual.results)
        .find(|(want, got)| want != got)
        .map_or(expected.results.len().min(actual.results.len()), |(want, _)| want.step);
    Some(step)
}

fn print_help() {
    println!("Usage: script_harness --fixture <path> [options]");
    println!("  -f, --fixture        Scheduler replay fixture (JSON)");
    println!("  -n, --steps          Override the number of ticks to replay");
    println!("  -s, --speed          Override the game speed factor");
    println!("      --summary        Print logs and scheduler events per step");
    println!("  -g, --golden         Fail when the replay differs from this output");
    println!("  -o, --write-output   Write the replay output JSON here");
}
