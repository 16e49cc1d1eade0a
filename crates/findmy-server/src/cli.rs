use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use findmy_device::{codec, link, UpsertOutcome};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use crate::app::App;
use crate::daemon;
use crate::signal::SignalHandler;

#[derive(Parser, Debug)]
#[command(name = "findmy", author, version, about, long_about = None)]
pub struct Cli {
    /// Directory containing findmy.toml
    #[arg(short, long, default_value = ".")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the daemon: sensors, relay publishing and periodic sync
    Run,
    /// Print this device's record
    Whoami,
    /// Print known devices as JSON lines
    List,
    /// Add a device by id
    Add {
        id: String,
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Ingest a decoded QR code payload
    Scan { payload: String },
    /// Ingest a shared link and print it without the device parameter
    ImportLink { url: String },
    /// Print a shared link and QR payload for this device
    Share {
        #[arg(short, long, default_value = "https://findmy.local/")]
        base: String,
    },
    /// Remove a device by id
    Remove { id: String },
    /// Fetch the relay once and merge into the registry
    Sync,
    /// Print the effective configuration
    Config,
}

/// 执行单次命令，结果写入 `out`
///
/// `Run` 由 [`run`] 处理。
pub async fn execute(app: &App, command: &Command, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Run => return Err(anyhow!("run is not a one-shot command")),
        Command::Whoami => {
            let me = app.manager.self_record().await;
            writeln!(out, "{}", codec::encode(&me)?)?;
        }
        Command::List => {
            for record in app.manager.list().await {
                writeln!(out, "{}", codec::encode(&record)?)?;
            }
        }
        Command::Add { id, name } => {
            let report = app.manager.add_manual(id, name.as_deref()).await?;
            write_report(out, report.outcome, &report.record)?;
        }
        Command::Scan { payload } => {
            let report = app
                .manager
                .ingest_scan(payload)
                .await
                .context("Scan payload rejected")?;
            write_report(out, report.outcome, &report.record)?;
        }
        Command::ImportLink { url } => {
            let url = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
            let import = app.manager.import_link(&url).await;
            writeln!(out, "{}", import.url)?;
            match import.outcome {
                Some(Ok(report)) => write_report(out, report.outcome, &report.record)?,
                Some(Err(e)) => return Err(e).context("Shared link rejected"),
                None => return Err(anyhow!("Link has no {} parameter", link::SHARE_PARAM)),
            }
        }
        Command::Share { base } => {
            let base = Url::parse(base).with_context(|| format!("Invalid base URL: {}", base))?;
            writeln!(out, "{}", app.manager.share_link(&base).await?)?;
            writeln!(out, "{}", app.manager.scan_payload().await?)?;
        }
        Command::Remove { id } => {
            if app.manager.remove(id).await? {
                writeln!(out, "removed {}", id)?;
            } else {
                writeln!(out, "not found {}", id)?;
            }
        }
        Command::Sync => {
            let summary = app.sync_once().await?;
            writeln!(
                out,
                "fetched={} ingested={} rejected={} skipped={}",
                summary.fetched, summary.ingested, summary.rejected, summary.skipped
            )?;
        }
        Command::Config => {
            write!(out, "{}", app.config.to_toml()?)?;
        }
    }
    Ok(())
}

fn write_report(
    out: &mut impl Write,
    outcome: UpsertOutcome,
    record: &findmy_device::DeviceRecord,
) -> Result<()> {
    let verb = match outcome {
        UpsertOutcome::Inserted => "added",
        UpsertOutcome::Replaced | UpsertOutcome::Merged => "updated",
        UpsertOutcome::Stale => "ignored",
    };
    writeln!(out, "{} {}", verb, codec::encode(record)?)?;
    Ok(())
}

/// 执行命令：`Run` 进入守护进程，其余命令执行后刷新存储退出
pub async fn run(app: App, command: &Command) -> Result<()> {
    if *command == Command::Run {
        let (signals, _rx) = SignalHandler::new();
        return daemon::run(Arc::new(app), &signals).await;
    }

    let mut stdout = std::io::stdout();
    let result = execute(&app, command, &mut stdout).await;
    app.shutdown().await?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::parse_from(["findmy", "--config-dir", "/etc/findmy", "add", "abc", "--name", "Keys"]);
        assert_eq!(cli.config_dir, PathBuf::from("/etc/findmy"));
        assert_eq!(
            cli.command,
            Command::Add {
                id: "abc".to_string(),
                name: Some("Keys".to_string()),
            }
        );

        let cli = Cli::parse_from(["findmy", "import-link", "https://example.com/?device=x"]);
        assert!(matches!(cli.command, Command::ImportLink { .. }));

        let cli = Cli::parse_from(["findmy", "share"]);
        assert_eq!(
            cli.command,
            Command::Share {
                base: "https://findmy.local/".to_string(),
            }
        );
        assert!(Cli::try_parse_from(["findmy", "remove"]).is_err());
    }
}
