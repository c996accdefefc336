//! pscore CLI

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use ps_inference::{
    run_analysis, simulate_population, AdjustmentStrategy, AnalysisConfig, SimulationConfig,
};

#[derive(Parser)]
#[command(name = "pscore")]
#[command(about = "Propensity-score causal effect estimation on simulated observational data")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// Quantile stratification on the propensity score
    Stratification,
    /// Full matching on the propensity score
    Matching,
    /// Inverse-probability (ATE) weighting
    Weighting,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic observational population
    Simulate {
        /// Population size
        #[arg(long, default_value = "2000")]
        n: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// True additive effect of exposure on the outcome
        #[arg(long, default_value = "2.0")]
        effect: f64,

        /// Output file for the records (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the full pipeline: simulate, fit, adjust, balance-check, estimate
    Analyze {
        /// Population size
        #[arg(long, default_value = "2000")]
        n: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// True additive effect of exposure on the outcome
        #[arg(long, default_value = "2.0")]
        effect: f64,

        /// Adjustment strategy
        #[arg(long, value_enum, default_value = "stratification")]
        strategy: StrategyArg,

        /// Number of strata (stratification only)
        #[arg(long, default_value = "5")]
        strata: usize,

        /// Minimum records per matched set (matching only)
        #[arg(long, default_value = "2")]
        min_set_size: usize,

        /// Balance flag threshold on the absolute standardized mean difference
        #[arg(long, default_value = "0.1")]
        balance_threshold: f64,

        /// Two-sided confidence level for intervals
        #[arg(long, default_value = "0.95")]
        conf_level: f64,

        /// Output file for the report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Simulate { n, seed, effect, output } => {
            cmd_simulate(n, seed, effect, output.as_ref())
        }
        Commands::Analyze {
            n,
            seed,
            effect,
            strategy,
            strata,
            min_set_size,
            balance_threshold,
            conf_level,
            output,
        } => cmd_analyze(
            n,
            seed,
            effect,
            strategy,
            strata,
            min_set_size,
            balance_threshold,
            conf_level,
            output.as_ref(),
        ),
    }
}

fn cmd_simulate(n: usize, seed: u64, effect: f64, output: Option<&PathBuf>) -> Result<()> {
    let config = SimulationConfig { n, seed, exposure_effect: effect };
    let records = simulate_population(&config)?;

    let n_exposed = records.iter().filter(|r| r.exposure == 1).count();
    tracing::info!(n = records.len(), n_exposed, "population generated");

    let output_json = serde_json::json!({
        "n": records.len(),
        "seed": seed,
        "exposure_effect": effect,
        "n_exposed": n_exposed,
        "records": records,
    });
    write_json(output, output_json)
}

#[allow(clippy::too_many_arguments)]
fn cmd_analyze(
    n: usize,
    seed: u64,
    effect: f64,
    strategy: StrategyArg,
    strata: usize,
    min_set_size: usize,
    balance_threshold: f64,
    conf_level: f64,
    output: Option<&PathBuf>,
) -> Result<()> {
    let strategy = match strategy {
        StrategyArg::Stratification => AdjustmentStrategy::Stratification { k: strata },
        StrategyArg::Matching => AdjustmentStrategy::FullMatching { min_set_size },
        StrategyArg::Weighting => AdjustmentStrategy::InverseProbability,
    };
    let config = AnalysisConfig {
        simulation: SimulationConfig { n, seed, exposure_effect: effect },
        strategy,
        balance_threshold: Some(balance_threshold),
        effect: ps_inference::EffectConfig { conf_level, ..Default::default() },
        ..Default::default()
    };

    let report = run_analysis(&config)?;
    tracing::info!(
        ate = report.effect.ate.estimate,
        se = report.effect.ate.std_error,
        balanced = report.balance.balanced,
        "analysis complete"
    );

    let output_json = serde_json::json!({
        "strategy": report.strategy,
        "n": report.records.len(),
        "seed": seed,
        "propensity": {
            "names": report.propensity.names,
            "coefficients": report.propensity.coefficients,
            "se": report.propensity.se,
            "nll": report.propensity.nll,
            "converged": report.propensity.converged,
            "n_iter": report.propensity.n_iter,
        },
        "balance": report.balance,
        "effect": report.effect,
    });
    write_json(output, output_json)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
