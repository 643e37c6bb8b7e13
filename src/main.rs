//! Globopt CLI
//!
//! Optimizes IR functions stored as JSON, or one of the built-in scenarios.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use globopt::ir::Func;
use globopt::{scenarios, GlobOpt, GlobOptConfig, OptStats, VERSION};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "globopt")]
#[command(author, version, about = "Global optimizer for a JavaScript JIT IR", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optimizer configuration (JSON); missing fields keep their defaults
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize a function stored as JSON
    Optimize {
        /// The IR file
        file: PathBuf,

        /// Write the optimized function here as JSON
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Only print the statistics
        #[arg(short, long)]
        quiet: bool,
    },

    /// Optimize a built-in scenario
    Demo {
        /// Scenario name; lists the scenarios when omitted
        name: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => GlobOptConfig::load(path)
            .with_context(|| format!("loading config '{}'", path.display()))?,
        None => GlobOptConfig::default(),
    };
    let opt = GlobOpt::new(config);

    match cli.command {
        Commands::Optimize { file, output, quiet } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("reading '{}'", file.display()))?;
            let mut func = Func::from_json(&text)
                .with_context(|| format!("parsing '{}'", file.display()))?;
            let stats = run(&opt, &mut func)?;
            if !quiet {
                println!("{}", func);
            }
            println!("{}", stats);
            if let Some(out) = output {
                fs::write(&out, func.to_json()?)
                    .with_context(|| format!("writing '{}'", out.display()))?;
            }
        }
        Commands::Demo { name: None } => {
            println!("globopt {} scenarios:", VERSION);
            for s in scenarios::SCENARIOS {
                println!("  {:<14} {}", s.name, s.source);
            }
        }
        Commands::Demo { name: Some(name) } => {
            let Some(scenario) = scenarios::find(&name) else {
                bail!("unknown scenario '{}'", name);
            };
            let mut func = scenario.build()?;
            println!("// {}", scenario.source);
            println!("{}", func);
            let stats = run(&opt, &mut func)?;
            println!("{}", func);
            println!("{}", stats);
        }
    }
    Ok(())
}

fn run(opt: &GlobOpt, func: &mut Func) -> anyhow::Result<OptStats> {
    let start = Instant::now();
    let stats = opt
        .optimize_with_retry(func)
        .with_context(|| format!("optimizing '{}'", func.name))?;
    tracing::info!(elapsed = ?start.elapsed(), "done");
    Ok(stats)
}

fn setup_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "globopt=info",
        2 => "globopt=debug",
        _ => "globopt=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
