use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scfg::generate::spawn_random_string;
use scfg::output::write_grammar;
use scfg::parser::{load_corpus, load_grammar, read_corpus};
use scfg::structs::{Cli, Commands, CorpusArgs, GenerateArgs, InfoArgs, TrainArgs, VerifyArgs};
use scfg::{CoordinateAscent, Result, Scfg, ScfgError};

fn main() -> ExitCode {
    init_subscriber();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Info(args) => run_info(args),
        Commands::Parse(args) => run_parse(args),
        Commands::Inside(args) => run_inside(args),
        Commands::Verify(args) => run_verify(args),
        Commands::Generate(args) => run_generate(args),
        Commands::Train(args) => run_train(args),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_ansi(false),
        )
        .with(filter)
        .try_init()
        .ok();
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn corpus_from(path: Option<&Path>) -> Result<Vec<String>> {
    match path {
        Some(path) => load_corpus(path),
        None => read_corpus(io::stdin().lock()),
    }
}

fn engine_with_corpus(args: &CorpusArgs) -> Result<Scfg> {
    let grammar = load_grammar(&args.grammar)?;
    let mut scfg = Scfg::new(grammar);
    let corpus = corpus_from(args.corpus.as_deref())?;
    scfg.set_corpus(&corpus)?;
    Ok(scfg)
}

fn run_info(args: InfoArgs) -> Result<()> {
    let grammar = load_grammar(&args.grammar)?;
    let mut scfg = Scfg::new(grammar);
    if let Some(path) = &args.corpus {
        scfg.set_corpus(&load_corpus(path)?)?;
    }
    let json = scfg.diagnostics().to_json()?;
    println!("{}", json);
    Ok(())
}

fn run_parse(args: CorpusArgs) -> Result<()> {
    let scfg = engine_with_corpus(&args)?;
    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());

    for (i, result) in scfg.best_parse_all().into_iter().enumerate() {
        match result {
            Ok(tree) => writeln!(writer, "{}", tree.to_bracketed(scfg.grammar()))?,
            Err(ScfgError::ParseFailure { .. }) => {
                writeln!(writer, "(NOPARSE {})", scfg.corpus()[i].text)?
            }
            Err(e) => return Err(e),
        }
    }
    writer.flush()?;
    Ok(())
}

fn run_inside(args: CorpusArgs) -> Result<()> {
    let mut scfg = engine_with_corpus(&args)?;
    for i in 0..scfg.corpus().len() {
        let p = scfg.string_probability(i)?;
        println!("{}\t{}", scfg.corpus()[i].text, p);
    }
    println!("log-likelihood\t{}", scfg.log_likelihood()?);
    Ok(())
}

fn run_verify(args: VerifyArgs) -> Result<()> {
    let grammar = load_grammar(&args.grammar)?;
    match grammar.verify_values() {
        Ok(()) => println!("current values: ok"),
        Err(e @ ScfgError::ProbabilityConsistency { .. }) => println!("current values: {}", e),
        Err(e) => return Err(e),
    }

    let mut rng = make_rng(args.seed);
    let report = grammar.random_sample_verify(args.samples, &mut rng)?;
    println!(
        "sampled values: {} of {} samples failed",
        report.failures.len(),
        report.samples
    );
    for failure in &report.failures {
        let point: Vec<String> = failure
            .values
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        println!("  sample {} [{}]: {}", failure.sample, point.join(", "), failure.reason);
    }
    Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    let grammar = load_grammar(&args.grammar)?;
    let mut rng = make_rng(args.seed);
    for _ in 0..args.count {
        let s = spawn_random_string(&grammar, args.from, Some(args.max_depth), &mut rng)?;
        println!("{}", s);
    }
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<()> {
    let grammar = load_grammar(&args.grammar)?;
    grammar.verify_values()?;
    let mut scfg = Scfg::new(grammar);
    scfg.set_corpus(&load_corpus(&args.corpus)?)?;

    let optimizer = CoordinateAscent {
        max_sweeps: args.iterations,
        tolerance: args.tolerance,
        ..CoordinateAscent::default()
    };
    let report = optimizer.optimize(&mut scfg)?;
    info!(
        initial = report.initial_objective,
        final_objective = report.final_objective,
        sweeps = report.sweeps,
        evaluations = report.evaluations,
        "training finished"
    );

    println!("log-likelihood\t{}", report.final_objective);
    for &id in scfg.grammar().used_parameters() {
        if let Some(p) = scfg.grammar().parameters().get(id) {
            println!("{}\t{}", p.name, p.value);
        }
    }

    if let Some(path) = &args.output {
        write_grammar(scfg.grammar(), path)?;
        eprintln!("Successfully wrote: {}", path.display());
    }
    Ok(())
}
