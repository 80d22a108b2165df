//! Consistency benchmark CLI

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use consistency_bench::{
    analysis::{Evaluation, Evaluator},
    config::Config,
    problems::{load_corpus, save_corpus, Category, Problem, QuestionGenerator},
    providers::create_backends,
    reporting::{print_console_report, print_run_summary, write_outputs, JsonSummary},
    runner::{Executor, ExecutorConfig, ExecutorError, ResponseLog, RunSummary},
};

#[derive(Parser)]
#[command(name = "consistency-bench")]
#[command(about = "Numerical-reasoning consistency probe for LLMs across paraphrases and repetitions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the question corpus
    Generate {
        /// Corpus output path (default: output.corpus_file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seed override
        #[arg(long)]
        seed: Option<u64>,

        /// Comma-separated categories to generate (default: from config)
        #[arg(long)]
        categories: Option<String>,

        /// Problems per category override
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Query every model, then evaluate
    Run {
        /// Corpus path (generated when missing)
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Output directory for evaluation results
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Regenerate the corpus even if the file exists
        #[arg(long)]
        regenerate: bool,
    },

    /// Recompute the evaluation from an existing response log
    Evaluate {
        /// Corpus path
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Response log path
        #[arg(short, long)]
        log: Option<PathBuf>,

        /// Output directory for evaluation results
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List problems in the corpus
    ListProblems {
        /// Corpus path
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Only this category
        #[arg(long)]
        category: Option<String>,

        /// Print all three paraphrases
        #[arg(long)]
        paraphrases: bool,
    },

    /// Generate sample configuration
    InitConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config/experiment.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("consistency_bench=debug,info")
    } else {
        EnvFilter::new("consistency_bench=info,warn")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::InitConfig { output } = &cli.command {
        return init_config(output);
    }

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_or_default(),
    };

    match cli.command {
        Commands::Generate {
            output,
            seed,
            categories,
            count,
        } => generate_corpus(&config, output, seed, categories, count)?,

        Commands::Run {
            corpus,
            output,
            regenerate,
        } => run_experiment(&config, corpus, output, regenerate).await?,

        Commands::Evaluate {
            corpus,
            log,
            output,
        } => evaluate_log(&config, corpus, log, output)?,

        Commands::ListProblems {
            corpus,
            category,
            paraphrases,
        } => list_problems(&config, corpus, category, paraphrases)?,

        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

fn question_generator(config: &Config) -> Result<QuestionGenerator, Box<dyn std::error::Error>> {
    let mut generator = QuestionGenerator::new();
    for (category, epsilon) in config.tolerances()? {
        generator = generator.with_tolerance(category, epsilon);
    }
    Ok(generator)
}

fn corpus_path(config: &Config, corpus: Option<PathBuf>) -> PathBuf {
    corpus.unwrap_or_else(|| PathBuf::from(&config.output.corpus_file))
}

fn write_corpus(path: &Path, problems: &[Problem]) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    save_corpus(path, problems)?;
    Ok(())
}

fn generate_corpus(
    config: &Config,
    output: Option<PathBuf>,
    seed: Option<u64>,
    categories_arg: Option<String>,
    count: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut counts = config.category_counts()?;

    if let Some(names) = categories_arg {
        let wanted = names
            .split(',')
            .map(|s| s.trim().parse::<Category>())
            .collect::<Result<Vec<_>, _>>()?;
        let default_count = config.experiment.num_problems;
        counts = wanted
            .into_iter()
            .map(|c| {
                let n = counts
                    .iter()
                    .find(|(category, _)| *category == c)
                    .map(|(_, n)| *n)
                    .unwrap_or(default_count);
                (c, n)
            })
            .collect();
    }
    if let Some(n) = count {
        for entry in &mut counts {
            entry.1 = n;
        }
    }

    let seed = seed.unwrap_or(config.experiment.seed);
    let problems = question_generator(config)?.generate_corpus(&counts, seed)?;

    let path = corpus_path(config, output);
    write_corpus(&path, &problems)?;
    println!("Wrote {} problems (seed {}) to {}", problems.len(), seed, path.display());
    Ok(())
}

/// Load the corpus, or generate and save it when missing
fn load_or_generate(
    config: &Config,
    path: &Path,
    regenerate: bool,
) -> Result<Vec<Problem>, Box<dyn std::error::Error>> {
    if path.exists() && !regenerate {
        let problems = load_corpus(path)?;
        tracing::info!("Loaded {} problems from {}", problems.len(), path.display());
        return Ok(problems);
    }

    let problems =
        question_generator(config)?.generate_corpus(&config.category_counts()?, config.experiment.seed)?;
    write_corpus(path, &problems)?;
    tracing::info!("Generated {} problems into {}", problems.len(), path.display());
    Ok(problems)
}

async fn run_experiment(
    config: &Config,
    corpus: Option<PathBuf>,
    output: Option<PathBuf>,
    regenerate: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    let run_id = Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let repeat = config.experiment.repetitions;

    println!("=== Numeric Consistency Benchmark ===");
    println!("Run ID: {}", run_id);
    println!();

    let problems = load_or_generate(config, &corpus_path(config, corpus), regenerate)?;
    if problems.is_empty() {
        eprintln!("Error: corpus is empty");
        std::process::exit(1);
    }

    let backends = create_backends(config)?;
    let mut models: Vec<&String> = backends.keys().collect();
    models.sort();
    println!(
        "Models:   {}",
        models.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ")
    );
    println!("Problems: {}", problems.len());
    println!("Repeat:   {}", repeat);
    println!();

    let log_path = PathBuf::from(&config.output.response_log);
    let log = Arc::new(ResponseLog::open(&log_path).await?);
    let executor = Executor::new(backends, log, ExecutorConfig::from_config(config));

    let cancel = executor.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing in-flight queries");
            cancel.cancel();
        }
    });

    println!("Querying models...");
    let (summary, halted) = match executor.batch_query(&problems, repeat).await {
        Ok(summary) => (summary, None),
        Err(ExecutorError::BackendUnavailable {
            model,
            message,
            summary,
        }) => (summary, Some(format!("backend for {} unavailable: {}", model, message))),
        Err(e) => return Err(e.into()),
    };
    print_run_summary(&summary);

    // evaluate whatever the log holds, including earlier runs
    let records = ResponseLog::load(&log_path)?;
    let evaluation = Evaluator::new(repeat).evaluate(&problems, &records);
    let output_dir = output.unwrap_or_else(|| PathBuf::from(&config.output.output_dir).join(&run_id));
    report(&run_id, &evaluation, repeat, Some(summary), &output_dir)?;

    match halted {
        Some(reason) => Err(reason.into()),
        None => Ok(()),
    }
}

fn evaluate_log(
    config: &Config,
    corpus: Option<PathBuf>,
    log: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let run_id = format!("eval-{}", Utc::now().format("%Y%m%d-%H%M%S"));
    let repeat = config.experiment.repetitions.max(1);

    let problems = load_corpus(corpus_path(config, corpus))?;
    let log_path = log.unwrap_or_else(|| PathBuf::from(&config.output.response_log));
    let records = ResponseLog::load(&log_path)?;
    println!(
        "Evaluating {} records from {} against {} problems",
        records.len(),
        log_path.display(),
        problems.len()
    );

    let evaluation = Evaluator::new(repeat).evaluate(&problems, &records);
    let output_dir = output.unwrap_or_else(|| PathBuf::from(&config.output.output_dir).join(&run_id));
    report(&run_id, &evaluation, repeat, None, &output_dir)
}

fn report(
    run_id: &str,
    evaluation: &Evaluation,
    repeat: u32,
    run: Option<RunSummary>,
    output_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    for skipped in &evaluation.skipped {
        eprintln!("  [skipped] {} / {}: {}", skipped.model, skipped.problem_id, skipped.reason);
    }

    print_console_report(evaluation);

    let summary = JsonSummary::from_evaluation(run_id, evaluation, repeat, run);
    write_outputs(output_dir, evaluation, &summary)?;
    println!("\nResults written to: {}", output_dir.display());
    Ok(())
}

fn list_problems(
    config: &Config,
    corpus: Option<PathBuf>,
    category: Option<String>,
    paraphrases: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = corpus_path(config, corpus);
    let mut problems = if path.exists() {
        load_corpus(&path)?
    } else {
        println!("(no corpus at {}; showing generated problems)", path.display());
        question_generator(config)?.generate_corpus(&config.category_counts()?, config.experiment.seed)?
    };

    if let Some(name) = category {
        let category: Category = name.parse()?;
        problems.retain(|p| p.category == category);
    }

    println!("Problems ({}):", problems.len());
    println!("{:-<60}", "");

    for problem in &problems {
        println!(
            "  {} | {} | {} | {}",
            problem.id, problem.category, problem.operation, problem.ground_truth
        );
        if paraphrases {
            for (variant, text) in problem.paraphrases.iter() {
                println!("      {:<15} {}", variant.as_str(), text);
            }
        }
    }

    Ok(())
}

fn init_config(output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    Config::default().save_toml(output)?;
    println!("Configuration written to: {}", output.display());
    Ok(())
}
