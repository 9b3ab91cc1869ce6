use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use proof_loop::config::LoopConfig;
use proof_loop::lean::LeanChecker;
use proof_loop::problem::{load_problems, write_tag_files, Problem};
use proof_loop::runner::{BatchRunner, SessionRunner};
use proof_loop::trajectory::{
    export_events, CollectingEmitter, ExportFormat, LogEmitter, TrajectoryEmitter,
};
use proof_loop::{Error, Result, SessionOutcome};

#[derive(Parser)]
#[command(name = "proof-loop")]
#[command(version, about = "Plan, prove, verify and critique Lean 4 proofs with language models")]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one proof session on a problem
    Run {
        /// Problem file (JSON object or array)
        #[arg(short, long)]
        problem: PathBuf,
        /// Index into the problem array
        #[arg(long, default_value_t = 0)]
        index: usize,
        /// Override `[session] max_iterations`
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Write trajectory events here as JSON lines
        #[arg(long)]
        trajectory: Option<PathBuf>,
    },
    /// Check a Lean file once with the configured checker
    Check { file: PathBuf },
    /// Run many problems in parallel
    Batch {
        #[arg(short, long)]
        problems: PathBuf,
        #[arg(short, long, default_value_t = 4)]
        workers: usize,
        /// Only run problems with this tag
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Write JSON results here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Split a problem file into one file per tag
    Split {
        #[arg(short, long)]
        problems: PathBuf,
        #[arg(short, long)]
        output_dir: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>, max_iterations: Option<u32>) -> Result<LoopConfig> {
    let mut config = LoopConfig::load_or_default(path)?;
    if let Some(n) = max_iterations {
        config = config.with_max_iterations(n);
    }
    config.validate()?;
    Ok(config)
}

async fn run_one(
    config_path: Option<&Path>,
    problem_path: &Path,
    index: usize,
    max_iterations: Option<u32>,
    trajectory: Option<&Path>,
) -> Result<ExitCode> {
    let config = load_config(config_path, max_iterations)?;
    let problems = load_problems(problem_path)?;
    let problem = problems.get(index).ok_or_else(|| {
        Error::config(format!(
            "problem index {} out of range ({} problems in {})",
            index,
            problems.len(),
            problem_path.display()
        ))
    })?;

    let client = config.build_client()?;
    let collector = CollectingEmitter::new();
    let emitter: Arc<dyn TrajectoryEmitter> = match trajectory {
        Some(_) => Arc::new(collector.clone()),
        None => Arc::new(LogEmitter),
    };
    let runner =
        SessionRunner::new(config.build_stages(client.clone(), None)?).with_emitter(emitter);

    println!("Problem: {}", problem.problem_id);
    let result = runner
        .run_problem(problem, config.session.max_iterations)
        .await;

    // Keep the trajectory of aborted sessions too.
    if let Some(path) = trajectory {
        std::fs::write(path, export_events(&collector.events(), ExportFormat::JsonLines))?;
    }
    let report = result?;
    let costs = client.costs().await;

    println!("Outcome: {}", report.outcome);
    println!(
        "Iterations: {} / {} ({} prove cycles, {} ms)",
        report.state.iteration_count,
        report.state.iteration_limit,
        report.prove_cycles,
        report.elapsed_ms
    );
    println!("LLM usage: {} requests, ${:.4}", costs.request_count, costs.total_cost);
    println!("\n--- Final candidate ---\n{}", report.state.candidate);
    println!("\n--- Last verification log ---\n{}", report.state.verify_log);

    Ok(match report.outcome {
        SessionOutcome::Verified => ExitCode::SUCCESS,
        SessionOutcome::Exhausted => ExitCode::from(1),
    })
}

async fn check_file(config_path: Option<&Path>, file: &Path) -> Result<ExitCode> {
    let config = load_config(config_path, None)?;
    let source = std::fs::read_to_string(file)
        .map_err(|e| Error::config(format!("cannot read {}: {}", file.display(), e)))?;

    let checker = LeanChecker::new(config.checker_config()?)?;
    let outcome = checker.check(&source).await?;

    println!("Status: {:?} ({} ms)", outcome.status, outcome.elapsed_ms);
    if !outcome.log.is_empty() {
        println!("{}", outcome.log);
    }
    Ok(if outcome.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

async fn run_batch(
    config_path: Option<&Path>,
    problems_path: &Path,
    workers: usize,
    tag: Option<&str>,
    max_iterations: Option<u32>,
    output: Option<&Path>,
) -> Result<ExitCode> {
    let config = load_config(config_path, max_iterations)?;
    let problems: Vec<Problem> = load_problems(problems_path)?
        .into_iter()
        .filter(|p| tag.map_or(true, |t| p.has_tag(t)))
        .collect();
    if problems.is_empty() {
        return Err(Error::config("no problems selected"));
    }

    let client = config.build_client()?;
    let slots = (0..workers.clamp(1, problems.len()))
        .map(|slot| {
            config
                .build_stages(client.clone(), Some(slot))
                .map(|stages| SessionRunner::new(stages).with_emitter(Arc::new(LogEmitter)))
        })
        .collect::<Result<Vec<_>>>()?;
    let batch = BatchRunner::new(slots)?;

    let results = batch.run(&problems, config.session.max_iterations).await;
    let costs = client.costs().await;

    for entry in &results.entries {
        match (&entry.report, &entry.error) {
            (Some(report), _) => println!("{:<32} {}", entry.problem_id, report.outcome),
            (None, Some(error)) => println!("{:<32} failed: {}", entry.problem_id, error),
            (None, None) => {}
        }
    }
    let s = results.summary;
    println!(
        "\n{} problems: {} verified, {} exhausted, {} failed; {} LLM requests, ${:.4}",
        s.total, s.verified, s.exhausted, s.failed, costs.request_count, costs.total_cost
    );

    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&results)?)?;
        println!("Results written to {}", path.display());
    }

    Ok(if s.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn split(problems_path: &Path, output_dir: &Path) -> Result<ExitCode> {
    let problems = load_problems(problems_path)?;
    let written = write_tag_files(&problems, output_dir)?;
    for path in &written {
        println!("{}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    // A missing .env is fine; keys may come from the environment.
    let _ = dotenvy::dotenv();
    init_logging(cli.verbose);

    let config = cli.config.as_deref();
    let result = match &cli.command {
        Commands::Run {
            problem,
            index,
            max_iterations,
            trajectory,
        } => run_one(config, problem, *index, *max_iterations, trajectory.as_deref()).await,
        Commands::Check { file } => check_file(config, file).await,
        Commands::Batch {
            problems,
            workers,
            tag,
            max_iterations,
            output,
        } => {
            run_batch(
                config,
                problems,
                *workers,
                tag.as_deref(),
                *max_iterations,
                output.as_deref(),
            )
            .await
        }
        Commands::Split {
            problems,
            output_dir,
        } => split(problems, output_dir),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "proof-loop failed");
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}
