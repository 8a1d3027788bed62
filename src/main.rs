use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use audiofs::{
    cli::commands::{Cli, Commands},
    import::outcome::{ImportOutcome, MatchKind},
    utils::{file_ops, parallel::ParallelProcessor, reporting::Reporter},
    AudioFs, EngineOptions, FingerprintProvider, SymphoniaProvider,
};

fn init_logging(level: Option<&str>) {
    let mut builder = match level {
        Some(filter) => {
            let mut b = env_logger::Builder::new();
            b.parse_filters(filter);
            b
        }
        None => env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")),
    };
    builder.init();
}

fn open_engine(cli: &Cli) -> audiofs::Result<AudioFs> {
    let options = EngineOptions {
        decode_timeout: Duration::from_secs(cli.timeout_secs),
        ..EngineOptions::default()
    };
    AudioFs::open(&cli.catalog, Arc::new(SymphoniaProvider::default()), options)
}

fn run(cli: Cli) -> audiofs::Result<i32> {
    match &cli.command {
        Commands::Import { paths, keep, careful } => {
            AudioFs::init_parallel_processing(cli.threads);
            let engine = open_engine(&cli)?;

            println!("=== Importing into {} ===", cli.catalog.display());
            let files = file_ops::expand_inputs(paths);
            println!("Found {} files to import", files.len());

            let (keep_original, careful) = (keep.keep_original(), careful.careful());
            let results = AudioFs::process_with_progress("Import", files, |file: PathBuf| {
                engine.import(&file, keep_original, careful)
            });

            let mut failed = 0;
            for result in &results {
                match result {
                    Ok(ImportOutcome::Committed(c)) => println!(
                        "  {} -> {} ({}, {})",
                        c.path.display(),
                        c.identity_id,
                        c.action.as_str(),
                        c.verdict.label()
                    ),
                    Ok(ImportOutcome::Rejected { path, reason }) => {
                        println!("  {} skipped: {}", path.display(), reason)
                    }
                    Err(failure) => {
                        failed += 1;
                        eprintln!("  {}", failure);
                    }
                }
            }
            println!("\n=== Imported {} of {} files ===", results.len() - failed, results.len());
            Ok(if failed > 0 { 1 } else { 0 })
        }

        Commands::Catalog { paths } => {
            let engine = open_engine(&cli)?;
            let files = file_ops::expand_inputs(paths);
            for file in &files {
                let ticket = engine.add_to_catalog(file)?;
                println!("  {} -> {}", file.display(), ticket);
            }
            println!("Catalogued {} files, {} pending", files.len(), engine.queue().pending_count()?);
            Ok(0)
        }

        Commands::ImportCatalog { keep, careful, report } => {
            AudioFs::init_parallel_processing(cli.threads);
            let engine = open_engine(&cli)?;

            println!("=== Replaying catalog {} ===", cli.catalog.display());
            let batch = engine.import_catalog(keep.keep_original(), careful.careful())?;
            for (ticket, failure) in batch.failures() {
                eprintln!("  {}: {}", ticket.id, failure);
            }
            println!(
                "Committed {}, rejected {}, failed {} of {} entries",
                batch.committed().count(),
                batch.rejected().count(),
                batch.failure_count(),
                batch.total()
            );

            if let Some(report_path) = report {
                Reporter::new().generate_batch_report(&batch, report_path)?;
                println!("Report saved to: {}", report_path.display());
            }
            Ok(if batch.ensure_complete().is_err() { 1 } else { 0 })
        }

        Commands::Exists { path, careful } => {
            let engine = open_engine(&cli)?;
            match engine.exists(path, careful.careful()) {
                Ok(verdict) => {
                    match verdict.match_kind() {
                        Some(MatchKind::Exact) => println!("{}: exact match", path.display()),
                        Some(MatchKind::Perceptual { similarity }) => {
                            println!("{}: perceptual match ({:.3})", path.display(), similarity)
                        }
                        Some(MatchKind::Ambiguous { candidates }) => {
                            println!("{}: {} ambiguous perceptual matches", path.display(), candidates)
                        }
                        None => println!("{}: not catalogued", path.display()),
                    }
                    Ok(if verdict.exists() { 0 } else { 1 })
                }
                Err(failure) => {
                    eprintln!("{}", failure);
                    Ok(2)
                }
            }
        }

        Commands::Analyze { path } => {
            let analyzed = SymphoniaProvider::default().analyze(path)?;
            let summary = serde_json::json!({
                "path": path,
                "exact_digest": analyzed.seed.digest().to_hex(),
                "fingerprint_frames": analyzed.fingerprint.as_ref().map(|f| f.words.len()),
                "metadata": analyzed.metadata,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(0)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            2
        }
    };
    process::exit(code);
}
