use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use matchstats_core::DataType;
use matchstats_storage::{decrypt, derive_key, EncryptedEnvelope};
use matchstats_sync::{IngestConfig, IngestPipeline};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "matchstats")]
#[command(about = "Incremental ingestion of encrypted match statistics")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile, fetch, normalize and write one season.
    Sync {
        #[arg(long)]
        year: Option<i32>,
        /// Restrict the run to these data types (repeatable).
        #[arg(long = "data-type", value_parser = parse_data_type)]
        data_types: Vec<DataType>,
        /// Refetch artifacts that are already archived.
        #[arg(long)]
        overwrite: bool,
    },
    /// Create listing and stat tables.
    Migrate,
    /// Decrypt a captured `{response, lastModified}` envelope and print its JSON.
    Decode { envelope: PathBuf },
    /// Print the key derived from an epoch-millisecond timestamp.
    Key { timestamp_ms: i64 },
}

fn parse_data_type(raw: &str) -> Result<DataType, String> {
    raw.parse()
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli.command.unwrap_or(Commands::Sync {
        year: None,
        data_types: Vec::new(),
        overwrite: false,
    }))
    .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "fatal");
            let report = serde_json::json!({
                "status": "failed",
                "error": err.to_string(),
                "causes": err.chain().skip(1).map(|c| c.to_string()).collect::<Vec<_>>(),
                "at": Utc::now(),
            });
            eprintln!("{report}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Sync {
            year,
            data_types,
            overwrite,
        } => {
            let mut config = IngestConfig::from_env()?;
            if year.is_some() {
                config.year = year;
            }
            if !data_types.is_empty() {
                config.data_types = data_types;
            }
            config.overwrite |= overwrite;

            let pipeline = IngestPipeline::connect(config).await?;
            let summary = pipeline.run_once().await.context("ingest run failed")?;
            println!(
                "sync complete: run_id={} year={} tournaments={} matches={} work_items={} aborted={} reports={}",
                summary.run_id,
                summary.year,
                summary.tournaments.selected,
                summary.matches.selected,
                summary.work_items,
                summary.aborted.as_deref().unwrap_or("no"),
                summary.reports_dir
            );
            for (data_type, s) in &summary.data_types {
                println!(
                    "  {data_type}: processed={} skipped={} failed={} rows={}",
                    s.processed, s.skipped, s.failed, s.rows_written
                );
            }
        }
        Commands::Migrate => {
            let config = IngestConfig::from_env()?;
            let pipeline = IngestPipeline::connect(config).await?;
            let tables = pipeline.migrate().await.context("creating tables")?;
            info!(tables = tables.len(), "migration complete");
            for table in tables {
                println!("{table}");
            }
        }
        Commands::Decode { envelope } => {
            let artifact = decode_file(&envelope).await?;
            let pretty = serde_json::to_string_pretty(artifact.value()).context("rendering artifact")?;
            println!("{pretty}");
        }
        Commands::Key { timestamp_ms } => {
            let key = derive_key(timestamp_ms)
                .with_context(|| format!("deriving key for {timestamp_ms}"))?;
            println!("{key}");
        }
    }
    Ok(())
}

async fn decode_file(path: &Path) -> Result<matchstats_core::DecryptedArtifact> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let envelope: EncryptedEnvelope = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a {{response, lastModified}} envelope", path.display()))?;
    decrypt(&envelope).with_context(|| format!("decrypting {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchstats_storage::seal;
    use serde_json::json;

    #[test]
    fn sync_flags_parse() {
        let cli = Cli::try_parse_from([
            "matchstats",
            "sync",
            "--year",
            "2023",
            "--data-type",
            "key-stats",
            "--data-type",
            "court-vision",
            "--overwrite",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Sync {
                year,
                data_types,
                overwrite,
            }) => {
                assert_eq!(year, Some(2023));
                assert_eq!(data_types, vec![DataType::KeyStats, DataType::CourtVision]);
                assert!(overwrite);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unknown_data_type_is_rejected() {
        assert!(Cli::try_parse_from(["matchstats", "sync", "--data-type", "heatmap"]).is_err());
    }

    #[tokio::test]
    async fn decode_reads_a_captured_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envelope.json");
        let envelope = seal(&json!({"setsCompleted": 2}), 1_700_000_000_000).unwrap();
        std::fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

        let artifact = decode_file(&path).await.unwrap();
        assert_eq!(artifact.value()["setsCompleted"], json!(2));
    }

    #[tokio::test]
    async fn decode_reports_non_envelopes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, "<html></html>").unwrap();
        let err = decode_file(&path).await.unwrap_err();
        assert!(err.to_string().contains("envelope"));
    }
}
