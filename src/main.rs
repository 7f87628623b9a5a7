use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use mailsift_contacts::ContactRecord;
use mailsift_core::{Config, Pipeline};
use mailsift_llm::extractor::EmailMeta;

#[derive(Parser)]
#[command(name = "mailsift", version, about = "Email contact extraction pipeline")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract contacts from one email text and deduplicate them.
    Extract {
        /// Text file to read, or `-` for stdin.
        #[arg(long)]
        input: PathBuf,
        /// TOML file with email metadata (from, subject, date, thread_id).
        /// Omitting it runs extraction in test mode without provider calls.
        #[arg(long)]
        meta: Option<PathBuf>,
        /// Pretty-print the JSON report.
        #[arg(long)]
        pretty: bool,
    },
    /// Deduplicate a JSON contact list produced by earlier extractions.
    Dedup {
        /// JSON file with an array of contact records, or `-` for stdin.
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        pretty: bool,
    },
    /// Print the provider-health projection for the current configuration.
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    config.validate()?;

    match cli.command {
        Command::Extract {
            input,
            meta,
            pretty,
        } => {
            let text = read_input(&input)?;
            let meta = meta.as_deref().map(read_meta).transpose()?;
            let mut pipeline = Pipeline::from_config(&config)?;
            let report = pipeline.process(&text, meta.as_ref()).await;
            if !report.extraction.success {
                tracing::error!(
                    error = report.extraction.error.as_deref().unwrap_or("unknown"),
                    "extraction failed"
                );
            }
            print_json(&report, pretty)?;
        }
        Command::Dedup { input, pretty } => {
            let raw = read_input(&input)?;
            let records: Vec<ContactRecord> =
                serde_json::from_str(&raw).context("failed to parse contact list")?;
            let deduplicated =
                mailsift_contacts::Deduplicator::new(config.dedup.to_dedup()).deduplicate(records);
            print_json(&deduplicated, pretty)?;
        }
        Command::Health => {
            let pipeline = Pipeline::from_config(&config)?;
            print_json(&pipeline.health(), true)?;
        }
    }

    Ok(())
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read stdin")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))
    }
}

fn read_meta(path: &Path) -> anyhow::Result<EmailMeta> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read metadata file {}", path.display()))?;
    toml::from_str(&content).context("failed to parse metadata file")
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn cli_parses_extract_with_meta() {
        let cli = Cli::try_parse_from([
            "mailsift", "extract", "--input", "mail.txt", "--meta", "meta.toml", "--pretty",
        ])
        .unwrap();
        match cli.command {
            Command::Extract {
                input,
                meta,
                pretty,
            } => {
                assert_eq!(input, PathBuf::from("mail.txt"));
                assert_eq!(meta, Some(PathBuf::from("meta.toml")));
                assert!(pretty);
            }
            _ => panic!("expected extract subcommand"),
        }
    }

    #[test]
    fn cli_default_config_path() {
        let cli = Cli::try_parse_from(["mailsift", "health"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config/default.toml"));
    }

    #[test]
    fn cli_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["mailsift", "ingest"]).is_err());
    }

    #[test]
    fn read_input_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mail.txt");
        std::fs::write(&path, "тело письма").unwrap();
        assert_eq!(read_input(&path).unwrap(), "тело письма");
    }

    #[test]
    fn read_input_missing_file_errors() {
        assert!(read_input(Path::new("/does/not/exist.txt")).is_err());
    }

    #[test]
    fn read_meta_parses_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
from = "ivan@x.ru"
subject = "Предложение"
date = "2024-03-01"
"#
        )
        .unwrap();

        let meta = read_meta(&path).unwrap();
        assert_eq!(meta.from, "ivan@x.ru");
        assert_eq!(meta.subject, "Предложение");
        assert_eq!(meta.thread_id, "");
    }

    #[test]
    fn config_loading_from_default_toml() {
        let config = Config::load(Path::new("config/default.toml")).unwrap();
        assert!(config.validate().is_ok());
    }
}
