use std::{io::Read, path::Path};

use clap::Parser;
use kbase::{
    Error,
    KbConfig,
    KnowledgeBase,
    Result,
    text_util::{DEFAULT_PREVIEW_CHARS, human_size, indent, preview},
    walker,
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{AddArgs, Cli, Command, ListArgs, QueryArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("KBASE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// Environment configuration with command-line overrides applied.
fn build_config(cli: &Cli) -> Result<KbConfig> {
    let mut config = KbConfig::from_env()?;
    if let Some(dir) = &cli.data_dir {
        config.storage_path = Some(dir.clone());
    }
    if let Some(model) = &cli.model {
        config.embedding_model = model.clone();
    }
    if let Some(size) = cli.chunk_size {
        config.chunk_size = size;
    }
    if let Some(overlap) = cli.chunk_overlap {
        config.chunk_overlap = overlap;
    }
    if let Some(backend) = &cli.backend {
        config.storage_backend = backend.parse()?;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let kb = KnowledgeBase::open(build_config(&cli)?)?;

    match cli.command {
        Command::Add(args) => cmd_add(&kb, &args)?,
        Command::AddText(args) => {
            let text = if args.text == "-" {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                args.text
            };
            let outcome = kb.add_document(&args.id, &text)?;
            println!(
                "Added '{}' ({} chunks)",
                outcome.document_id, outcome.chunk_count
            );
        }
        Command::Delete { id } => {
            let record = kb.delete_document(&id)?;
            println!("Deleted '{id}' ({} chunks)", record.chunk_count);
        }
        Command::List(args) => cmd_list(&kb, &args)?,
        Command::Query(args) => cmd_query(&kb, &args)?,
        Command::Enable { id } => {
            kb.set_document_enabled(&id, true)?;
            println!("Enabled '{id}'");
        }
        Command::Disable { id } => {
            kb.set_document_enabled(&id, false)?;
            println!("Disabled '{id}'");
        }
        Command::Rebuild(args) => {
            let report = kb.rebuild()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Restored {} document(s)", report.restored.len());
                for id in &report.dropped {
                    println!("  dropped: {id}");
                }
            }
        }
        Command::Status(args) => {
            let status = kb.status()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("Enabled: {}", status.enabled);
                println!("State: {}", status.state);
                if let Some(storage) = &status.storage {
                    println!("Storage: {}", storage.display());
                }
                println!("Backend: {}", kb.config().storage_backend);
                println!("Model: {}", status.model);
                println!("Documents: {}", status.documents);
                println!("Chunks: {}", status.chunks);
            }
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_add(kb: &KnowledgeBase, args: &AddArgs) -> Result<()> {
    if args.id.is_some() && (args.paths.len() != 1 || args.paths[0].is_dir()) {
        return Err(Error::Config(
            "--id can only be used when adding a single file".into(),
        ));
    }

    let mut added = 0usize;
    let mut first_error = None;

    for path in &args.paths {
        let files: Vec<_> = if path.is_dir() {
            walker::discover_files(path)?
                .into_iter()
                .map(|f| f.absolute_path)
                .collect()
        } else {
            vec![path.clone()]
        };

        if files.is_empty() {
            eprintln!("No supported files found in {}", path.display());
        }

        for file in files {
            match add_one(kb, &file, args.id.as_deref()) {
                Ok(()) => added += 1,
                Err(e) => {
                    tracing::error!(path = %file.display(), error = %e, "failed to add");
                    first_error.get_or_insert(e);
                }
            }
        }
    }

    eprintln!("Added {added} document(s)");
    first_error.map_or(Ok(()), Err)
}

fn add_one(kb: &KnowledgeBase, path: &Path, id: Option<&str>) -> Result<()> {
    let outcome = kb.add_file(path, id)?;
    println!(
        "Added '{}' ({} chunks)",
        outcome.document_id, outcome.added_chunks
    );
    Ok(())
}

fn cmd_list(kb: &KnowledgeBase, args: &ListArgs) -> Result<()> {
    let matcher = args
        .pattern
        .as_deref()
        .map(|pattern| {
            globset::Glob::new(pattern)
                .map(|g| g.compile_matcher())
                .map_err(|e| Error::Config(format!("invalid glob pattern: {e}")))
        })
        .transpose()?;

    let documents: Vec<_> = kb
        .documents()?
        .into_iter()
        .filter(|doc| matcher.as_ref().is_none_or(|m| m.is_match(&doc.id)))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&documents)?);
    } else if documents.is_empty() {
        println!("No documents.");
    } else {
        for doc in &documents {
            let size = doc
                .record
                .file_size
                .map(human_size)
                .unwrap_or_else(|| "-".to_string());
            let flag = if doc.record.enabled { "" } else { "\t(disabled)" };
            println!(
                "{}\t{} chunks\t{size}{flag}",
                doc.id, doc.record.chunk_count
            );
        }
        println!("\n{} document(s)", documents.len());
    }
    Ok(())
}

fn cmd_query(kb: &KnowledgeBase, args: &QueryArgs) -> Result<()> {
    let hits = kb.query(&args.text, args.count.unwrap_or(0))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else if hits.is_empty() {
        println!("No results.");
    } else {
        for (rank, hit) in hits.iter().enumerate() {
            println!("{}. {} (score: {:.3})", rank + 1, hit.document_id, hit.score);
            println!(
                "{}",
                indent(&preview(&hit.chunk_text, DEFAULT_PREVIEW_CHARS), 3)
            );
        }
    }
    Ok(())
}
