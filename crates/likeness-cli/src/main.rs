use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use image::DynamicImage;
use likeness_core::detector::parse_boxes;
use likeness_core::{BoundingBox, MatchResult, Recognition};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod repl;

use config::Config;
use engine::EngineHandle;
use repl::Command;

#[derive(Parser)]
#[command(name = "likeness", about = "Likeness face identification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize the faces in an image
    Identify {
        /// Image file (a face crop, or a full frame with --boxes)
        image: PathBuf,
        /// JSON array of detector boxes {x, y, width, height, confidence}
        #[arg(short, long)]
        boxes: Option<PathBuf>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enroll the unknown face in an image under a name
    Enroll {
        /// Name for this identity (repeat to add more reference faces)
        #[arg(short, long)]
        name: String,
        image: PathBuf,
        #[arg(short, long)]
        boxes: Option<PathBuf>,
    },
    /// List enrolled names
    List,
    /// Remove every record for a name
    Remove {
        name: String,
    },
    /// Remove all enrolled faces
    Clear,
    /// Remove all enrolled faces and dataset files
    Format,
    /// Show engine status
    Status,
    /// Interactive session reading commands from stdin
    Session,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let engine = engine::spawn_engine(&config).context("starting engine")?;

    match cli.command {
        Commands::Identify { image, boxes, json } => {
            let results = process(&engine, &image, boxes.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_recognitions(&results);
            }
        }
        Commands::Enroll { name, image, boxes } => {
            let results = process(&engine, &image, boxes.as_deref()).await?;
            print_recognitions(&results);
            if results.is_empty() {
                bail!("no face found in {}", image.display());
            }
            let outcome = engine.enroll(name).await?;
            println!("{} saved.", outcome.name);
        }
        Commands::List => {
            let names = engine.list_identities().await?;
            if names.is_empty() {
                println!("No faces enrolled");
            }
            for name in names {
                println!("{name}");
            }
        }
        Commands::Remove { name } => {
            match engine.delete_identity(name.clone()).await? {
                0 => println!("'{name}' is not enrolled."),
                n => println!("'{name}' deleted ({n} record(s))."),
            }
        }
        Commands::Clear => {
            engine.clear_all().await?;
            println!("All faces cleared.");
        }
        Commands::Format => {
            engine.format().await?;
            println!("Database and dataset formatted.");
        }
        Commands::Status => {
            let status = engine.status().await?;
            println!(
                "{}",
                serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "db_path": status.db_path,
                    "records": status.records,
                    "identities": status.identities,
                    "similarity_threshold": status.similarity_threshold,
                    "confidence_threshold": status.confidence_threshold,
                    "dataset_dir": config.mirror_enabled.then_some(&config.dataset_dir),
                })
            );
        }
        Commands::Session => run_session(&engine).await?,
    }

    Ok(())
}

async fn process(
    engine: &EngineHandle,
    image: &Path,
    boxes: Option<&Path>,
) -> Result<Vec<Recognition>> {
    let frame = load_image(image)?;
    let boxes = boxes.map(load_boxes).transpose()?;
    Ok(engine.process_frame(frame, boxes).await?)
}

fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("reading image {}", path.display()))
}

fn load_boxes(path: &Path) -> Result<Vec<BoundingBox>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading boxes {}", path.display()))?;
    parse_boxes(&json).with_context(|| format!("parsing boxes {}", path.display()))
}

fn print_recognitions(results: &[Recognition]) {
    if results.is_empty() {
        println!("No faces detected");
    }
    for (i, r) in results.iter().enumerate() {
        let b = &r.bbox;
        let verdict = match &r.result {
            MatchResult::Matched { name, score } => format!("{name} ({score:.3})"),
            MatchResult::Unmatched { best_score } => format!("Unknown (best {best_score:.3})"),
            MatchResult::NoGallery => "Unknown (no enrolled faces)".to_string(),
        };
        println!(
            "face {} at ({:.0}, {:.0}, {:.0}x{:.0}): {verdict}",
            i + 1,
            b.x,
            b.y,
            b.width,
            b.height
        );
    }
}

/// Read commands from stdin until `quit` or end of input.
async fn run_session(engine: &EngineHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", repl::HELP);

    while let Some(line) = lines.next_line().await? {
        let command = match repl::parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(msg) => {
                println!("{msg}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        // Failures are reported and the session continues.
        if let Err(e) = run_command(engine, command).await {
            println!("error: {e:#}");
        }
    }
    Ok(())
}

async fn run_command(engine: &EngineHandle, command: Command) -> Result<()> {
    match command {
        Command::Frame { image, boxes } => {
            let results = process(engine, &image, boxes.as_deref()).await?;
            print_recognitions(&results);
        }
        Command::Pending { save } => match (engine.pending_face().await?, save) {
            (None, _) => println!("Awaiting face…"),
            (Some(face), None) => {
                println!("Pending face: {}x{}", face.width(), face.height())
            }
            (Some(face), Some(path)) => {
                face.save(&path)
                    .with_context(|| format!("saving {}", path.display()))?;
                println!("Pending face saved to {}", path.display());
            }
        },
        Command::Enroll { name } => {
            let outcome = engine.enroll(name).await?;
            println!("{} saved.", outcome.name);
        }
        Command::List => {
            for name in engine.list_identities().await? {
                println!("{name}");
            }
        }
        Command::Delete { name } => match engine.delete_identity(name.clone()).await? {
            0 => println!("'{name}' is not enrolled."),
            _ => println!("'{name}' deleted."),
        },
        Command::Clear => {
            engine.clear_all().await?;
            println!("All faces cleared.");
        }
        Command::Reload => {
            engine.reload().await?;
            println!("List refreshed.");
        }
        Command::Format => {
            engine.format().await?;
            println!("Database and dataset formatted.");
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&engine.status().await?)?);
        }
        Command::Help => println!("{}", repl::HELP),
        Command::Quit => {}
    }
    Ok(())
}
