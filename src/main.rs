use anyhow::{Context, Result};
use clap::Parser;
use perfil::cli::{Cli, Command, ProfilingArgs};
use perfil::config::{ConfigResolver, EffectiveConfig, PartialConfig};
use perfil::scoped::SessionGuard;
use perfil::summary;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn resolve_config(prefix: &str, profiling: &ProfilingArgs) -> Result<EffectiveConfig> {
    ConfigResolver::new()
        .with_prefix(prefix)
        .resolve(&profiling.overrides())
        .context("invalid profiling configuration")
}

fn print_config(config: &EffectiveConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    println!("{}", json);
    Ok(())
}

fn run_summarize(
    prefix: &str,
    artifact: &Path,
    sort_by: Option<perfil::SortKey>,
    max_results: Option<u64>,
) -> Result<()> {
    let config = ConfigResolver::new()
        .with_prefix(prefix)
        .resolve(&PartialConfig {
            sort_by,
            max_results: max_results.map(|n| usize::try_from(n).unwrap_or(usize::MAX)),
            ..PartialConfig::default()
        })
        .context("invalid profiling configuration")?;

    let rows = summary::summarize(artifact, config.sort_by(), config.max_results())?;
    let mut stdout = std::io::stdout().lock();
    summary::write_table(&mut stdout, &rows, config.sort_by())?;
    Ok(())
}

fn run_demo(config: &EffectiveConfig, name: &str, iterations: u32, print_summary: bool) -> Result<()> {
    let guard = SessionGuard::enter(config, name)
        .context("failed to start profiling session")?
        .with_summary(print_summary);

    let checksum = demo::run(iterations);
    tracing::debug!(checksum, "demo workload finished");

    match guard.finish().context("failed to write profiling artifact")? {
        Some(path) => println!("{}", path.display()),
        None => println!("profiling disabled; no artifact written"),
    }
    Ok(())
}

/// Small instrumented workload used by `perfil demo`
mod demo {
    pub fn run(iterations: u32) -> u64 {
        perfil::frame!();
        (0..iterations)
            .map(|round| {
                let rows = generate(round);
                let parsed = parse(&rows);
                aggregate(&parsed)
            })
            .sum()
    }

    fn generate(round: u32) -> Vec<String> {
        perfil::frame!();
        (0..200).map(|i| format!("{},{}", round, i)).collect()
    }

    fn parse(rows: &[String]) -> Vec<u64> {
        perfil::frame!();
        rows.iter()
            .filter_map(|row| row.split(',').nth(1)?.parse().ok())
            .collect()
    }

    fn aggregate(values: &[u64]) -> u64 {
        perfil::frame!();
        values.iter().map(|v| fib(v % 12)).sum()
    }

    fn fib(n: u64) -> u64 {
        perfil::frame!();
        if n < 2 {
            n
        } else {
            fib(n - 1) + fib(n - 2)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Command::Config { profiling } => {
            let config = resolve_config(&cli.env_prefix, &profiling)?;
            print_config(&config)
        }
        Command::Summarize {
            artifact,
            sort_by,
            max_results,
        } => run_summarize(&cli.env_prefix, &artifact, sort_by, max_results),
        Command::Demo {
            iterations,
            name,
            summary,
            profiling,
        } => {
            let config = resolve_config(&cli.env_prefix, &profiling)?;
            run_demo(&config, &name, iterations, summary)
        }
    }
}
