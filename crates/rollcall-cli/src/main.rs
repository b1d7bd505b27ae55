use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use rollcall_core::{Embedding, ExternalEmbedderConfig, MatchResult};
use rollcall_hw::SnapshotCamera;
use rollcall_store::{AttendanceEntry, NewUser, Store, DEFAULT_ROLE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod kiosk;

use config::Config;
use engine::{spawn_engine, EngineHandle};
use kiosk::{Kiosk, KioskSettings, MarkOutcome, RegisterOutcome};

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Face recognition attendance kiosk")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/rollcall/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new user with a face sample from the camera
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Employee or student ID
        #[arg(long)]
        employee_id: String,
        /// Department or class
        #[arg(long, default_value = "")]
        department: String,
        #[arg(long, default_value = DEFAULT_ROLE)]
        role: String,
    },
    /// Recognize the face in front of the camera and mark attendance
    Mark,
    /// Match an embedding from a JSON file against enrolled users
    Identify {
        /// JSON array of numbers, or an object with a `values` array
        embedding: PathBuf,
    },
    /// Show attendance stats and recent check-ins
    Dashboard {
        /// Number of recent records to show
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// List registered users
    Users {
        #[arg(long)]
        json: bool,
    },
    /// Remove a user with their face data and attendance
    Remove {
        /// User ID to remove
        id: String,
    },
    /// Show store, camera and embedder status
    Status,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Register {
            name,
            email,
            employee_id,
            department,
            role,
        } => {
            let user = NewUser {
                name,
                email,
                employee_id,
                department,
                role,
            };
            register(&cfg, user).await
        }
        Commands::Mark => mark(&cfg).await,
        Commands::Identify { embedding } => identify(&cfg, &embedding),
        Commands::Dashboard { limit, json } => dashboard(&cfg, limit, json),
        Commands::Users { json } => users(&cfg, json),
        Commands::Remove { id } => remove(&cfg, &id),
        Commands::Status => status(&cfg).await,
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&cfg)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_kiosk(cfg: &Config) -> Result<Kiosk> {
    let store = Store::open(&cfg.db_path)
        .with_context(|| format!("opening store at {}", cfg.db_path.display()))?;
    Ok(Kiosk::new(
        store,
        KioskSettings {
            match_threshold: cfg.match_threshold,
            capture_attempts: cfg.capture_attempts,
            location: cfg.location.clone(),
        },
    ))
}

fn start_engine(cfg: &Config) -> Result<EngineHandle> {
    let camera = SnapshotCamera::new(&cfg.snapshot_path).with_max_age(cfg.snapshot_max_age());
    let embedder = ExternalEmbedderConfig {
        program: cfg.embedder.clone(),
        args: cfg.embedder_args.clone(),
        model_dir: cfg.model_dir.clone(),
        timeout: Some(cfg.capture_timeout()),
    };
    spawn_engine(camera, embedder, cfg.frame_interval(), cfg.capture_timeout())
        .context("failed to load face detection models")
}

async fn register(cfg: &Config, user: NewUser) -> Result<ExitCode> {
    let mut kiosk = open_kiosk(cfg)?;
    // Validate before touching the camera or models.
    if !user.has_required_fields() {
        println!("{}", RegisterOutcome::MissingFields.message());
        return Ok(ExitCode::FAILURE);
    }
    let engine = start_engine(cfg)?;

    println!("Detecting face...");
    let outcome = kiosk.register(&engine, &user).await?;
    println!("{}", outcome.message());
    match outcome {
        RegisterOutcome::Registered(user) => {
            println!("ID: {}", user.id);
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::FAILURE),
    }
}

async fn mark(cfg: &Config) -> Result<ExitCode> {
    let mut kiosk = open_kiosk(cfg)?;
    let engine = start_engine(cfg)?;

    println!("Detecting face...");
    let outcome = kiosk.mark(&engine).await?;
    println!("{}", outcome.message());
    match outcome {
        MarkOutcome::Marked {
            user,
            attendance,
            distance,
        } => {
            println!("Name: {}", user.name);
            println!("ID: {}", user.employee_id);
            println!(
                "Check-in: {}",
                attendance
                    .check_in_time
                    .with_timezone(&Local)
                    .format("%b %-d, %Y, %I:%M %p")
            );
            tracing::debug!(distance, "match distance");
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::FAILURE),
    }
}

/// Embedding file contents: a bare descriptor or a serialized [`Embedding`].
#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingFile {
    Values(Vec<f32>),
    Embedding(Embedding),
}

fn read_embedding(path: &Path) -> Result<Embedding> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading embedding {}", path.display()))?;
    let parsed: EmbeddingFile = serde_json::from_str(&raw)
        .with_context(|| format!("parsing embedding {}", path.display()))?;
    Ok(match parsed {
        EmbeddingFile::Values(values) => Embedding::new(values),
        EmbeddingFile::Embedding(e) => e,
    })
}

fn identify(cfg: &Config, path: &Path) -> Result<ExitCode> {
    let kiosk = open_kiosk(cfg)?;
    let query = read_embedding(path)?;

    match kiosk.identify(&query)? {
        MatchResult::Matched { identity, distance } => {
            let user = kiosk.store().get_user(&identity)?;
            match user {
                Some(user) => println!(
                    "Matched {} ({}) at distance {distance:.4}",
                    user.name, user.employee_id
                ),
                None => println!("Matched {identity} at distance {distance:.4}"),
            }
            Ok(ExitCode::SUCCESS)
        }
        MatchResult::NoMatch => {
            println!("Face not recognized.");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn dashboard(cfg: &Config, limit: Option<usize>, json: bool) -> Result<ExitCode> {
    let kiosk = open_kiosk(cfg)?;
    let report = kiosk.dashboard(&Local::now(), limit.unwrap_or(cfg.recent_limit))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Total Users:        {}", report.stats.total_users);
    println!("Today's Attendance: {}", report.stats.today_attendance);
    println!("Attendance Rate:    {}%", report.stats.attendance_rate);
    println!();

    if report.recent.is_empty() {
        println!("No attendance records found.");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{:<24} {:<12} {:<20} {:<22} {}",
        "NAME", "ID", "DEPARTMENT", "CHECK-IN", "STATUS"
    );
    for entry in &report.recent {
        println!("{}", format_entry(entry));
    }
    Ok(ExitCode::SUCCESS)
}

fn format_entry(entry: &AttendanceEntry) -> String {
    let (name, employee_id, department) = match &entry.user {
        Some(u) => (
            u.name.as_str(),
            u.employee_id.as_str(),
            non_empty_or(&u.department, "N/A"),
        ),
        None => ("Unknown", "N/A", "N/A"),
    };
    let check_in = entry
        .check_in_time
        .with_timezone(&Local)
        .format("%b %-d, %Y, %I:%M %p");
    format!(
        "{name:<24} {employee_id:<12} {department:<20} {:<22} {}",
        check_in.to_string(),
        entry.status
    )
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

fn users(cfg: &Config, json: bool) -> Result<ExitCode> {
    let kiosk = open_kiosk(cfg)?;
    let users = kiosk.store().list_users()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
    } else if users.is_empty() {
        println!("No users registered");
    } else {
        for user in &users {
            println!(
                "{}  {:<24} {:<12} {:<28} {}",
                user.id,
                user.name,
                user.employee_id,
                user.email,
                non_empty_or(&user.department, "-")
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn remove(cfg: &Config, id: &str) -> Result<ExitCode> {
    let kiosk = open_kiosk(cfg)?;
    if kiosk.store().remove_user(id)? {
        println!("Removed user {id}");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("No user with ID {id}");
        Ok(ExitCode::FAILURE)
    }
}

async fn status(cfg: &Config) -> Result<ExitCode> {
    let kiosk = open_kiosk(cfg)?;
    let store = kiosk.store();

    let engine = match start_engine(cfg) {
        Ok(handle) => serde_json::to_value(handle.status().await?)?,
        Err(e) => serde_json::json!({ "error": format!("{e:#}") }),
    };

    let status = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "db_path": cfg.db_path,
        "users": store.count_users()?,
        "enrolled_embeddings": store.count_enrolled()?,
        "match_threshold": cfg.match_threshold,
        "snapshot_path": cfg.snapshot_path,
        "engine": engine,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_register() {
        let cli = Cli::try_parse_from([
            "rollcall",
            "register",
            "--name",
            "Ada Lovelace",
            "--email",
            "ada@example.com",
            "--employee-id",
            "EMP001",
        ])
        .unwrap();
        match cli.command {
            Commands::Register {
                employee_id,
                department,
                role,
                ..
            } => {
                assert_eq!(employee_id, "EMP001");
                assert_eq!(department, "");
                assert_eq!(role, "student");
            }
            _ => panic!("expected register"),
        }
    }

    #[test]
    fn test_read_embedding_formats() {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("bare.json");
        std::fs::write(&bare, "[0.5, -0.25]").unwrap();
        assert_eq!(read_embedding(&bare).unwrap().values, vec![0.5, -0.25]);

        let tagged = dir.path().join("tagged.json");
        std::fs::write(&tagged, r#"{"values": [1.0], "model_version": "tiny"}"#).unwrap();
        let e = read_embedding(&tagged).unwrap();
        assert_eq!(e.values, vec![1.0]);
        assert_eq!(e.model_version.as_deref(), Some("tiny"));
    }

    #[test]
    fn test_format_entry_unknown_user() {
        let entry = AttendanceEntry {
            id: "a1".into(),
            check_in_time: chrono::Utc::now(),
            status: "present".into(),
            confidence_score: 0.9,
            user: None,
        };
        let line = format_entry(&entry);
        assert!(line.starts_with("Unknown"));
        assert!(line.ends_with("present"));
    }
}
