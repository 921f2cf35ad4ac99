//! Drive a game client offline from newline-delimited JSON engine messages.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::pin;

use clap::Parser;
use futures_util::stream;
use hopline_client::{ClientConfig, GameClient, SubmitReceipt, SubmissionReport};
use hopline_journal::{read_journal, verify_journal, write_journal};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hopline")]
#[command(about = "Aggregate game engine messages into per-session bundles")]
struct Cli {
    /// Message file, one JSON object per line. Reads stdin when omitted.
    input: Option<PathBuf>,

    /// JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a journal per finished session into this directory.
    #[arg(long, value_name = "DIR")]
    journal_out: Option<PathBuf>,

    /// Flush a still-live session once the input ends.
    #[arg(long)]
    flush_on_eof: bool,

    /// Verify a journal file and exit.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["input", "journal_out"])]
    verify: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(path) = cli.verify {
        return verify(&path);
    }

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path).map_err(io::Error::other)?,
        None => ClientConfig::default(),
    };
    if cli.journal_out.is_some() {
        config.record_journals = true;
    }

    let reader: Box<dyn AsyncRead + Unpin> = match &cli.input {
        Some(path) => Box::new(tokio::fs::File::open(path).await?),
        None => Box::new(tokio::io::stdin()),
    };
    let messages = stream::unfold(BufReader::new(reader).lines(), |mut lines| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(value) = parse_line(&line) {
                        return Some((value, lines));
                    }
                }
                Ok(None) => return None,
                Err(err) => {
                    error!(error = %err, "failed to read input");
                    return None;
                }
            }
        }
    });

    let mut client = GameClient::offline(&config);
    let mut reports = client.run(pin!(messages)).await;

    if cli.flush_on_eof
        && let Some(bundle) = client.force_flush()
    {
        let result = client.submit(bundle.clone()).await;
        reports.push(SubmissionReport { bundle, result });
    }

    for report in &reports {
        println!("{}", report_json(report));
    }
    info!(bundles = reports.len(), jumps = client.jump_counter(), "input finished");

    if let Some(dir) = &cli.journal_out {
        for journal in client.take_journals() {
            let path = dir.join(format!("{}.journal", journal.session_id));
            write_journal(&journal, &path)?;
            info!(path = %path.display(), "journal written");
        }
    }

    Ok(())
}

/// One input line as JSON; blank and malformed lines are skipped.
fn parse_line(line: &str) -> Option<Value> {
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(rule = "payload_unparseable", error = %err, "skipping line");
            None
        }
    }
}

fn verify(path: &Path) -> io::Result<()> {
    let journal = read_journal(path)?;
    verify_journal(&journal).map_err(io::Error::other)?;
    println!(
        "{}",
        json!({
            "sessionId": journal.session_id,
            "events": journal.events.len(),
            "endReason": journal.end_reason,
            "bundleSha256": journal.bundle_sha256,
            "verified": true,
        })
    );
    Ok(())
}

fn report_json(report: &SubmissionReport) -> Value {
    let (status, detail) = match &report.result {
        Ok(SubmitReceipt::Simulated) => ("simulated", Value::Null),
        Ok(SubmitReceipt::Submitted(receipt)) => ("submitted", json!(receipt.reference)),
        Err(err) => ("failed", json!(err.to_string())),
    };
    json!({
        "bundle": report.bundle,
        "status": status,
        "detail": detail,
    })
}
