use std::collections::VecDeque;
use std::sync::Arc;

use agritrace::certification::CertificationStateMachine;
use agritrace::config::Config;
use agritrace::crypto::fingerprint;
use agritrace::infra::{LedgerRecorder, SqliteLedger};
use agritrace::metrics::MetricsRegistry;
use agritrace::validation::{
    visual_quality_score, FormatValidator, PolicyEngine, PolicyInput, NEUTRAL_AUTHENTICITY_SCORE,
};
use agritrace::BatchId;

fn print_help() {
    eprintln!(
        "\
agritrace-admin

USAGE:
  agritrace-admin <command> [options]

COMMANDS:
  migrate                         Apply the ledger schema
  validate                        Run format, quality and policy checks on a local file
  ledger-records                  List ledger records for a batch
  certificate                     Show the recorded certificate for a batch
  rebuild                         Rebuild a batch from the ledger and certify it if eligible

COMMON OPTIONS:
  --database-url <sqlite_url>     (defaults to env LEDGER_DATABASE_URL)

validate OPTIONS:
  --file <path>                   (required) Image file
  --mime <type>                   (required) Declared MIME type, e.g. image/jpeg
  --score <p>                     (optional) Fake probability to decide with (default: 0.5)

ledger-records / certificate / rebuild OPTIONS:
  --batch-id <id>                 (required)

ENV:
  AGRITRACE_* thresholds and size limits, CERTIFICATE_VERIFY_BASE_URL, LEDGER_TIMEOUT_MS
"
    );
}

fn require_database_url(database_url: Option<String>) -> anyhow::Result<String> {
    database_url
        .or_else(|| std::env::var("LEDGER_DATABASE_URL").ok())
        .ok_or_else(|| anyhow::anyhow!("LEDGER_DATABASE_URL is required (or pass --database-url)"))
}

fn take_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

/// Options shared by the batch commands
#[derive(Default)]
struct BatchArgs {
    database_url: Option<String>,
    batch_id: Option<String>,
}

/// Returns `None` when help was requested
fn parse_batch_args(args: &mut VecDeque<String>) -> anyhow::Result<Option<BatchArgs>> {
    let mut parsed = BatchArgs::default();
    while let Some(arg) = args.pop_front() {
        match arg.as_str() {
            "--database-url" => parsed.database_url = Some(take_value(args, "--database-url")?),
            "--batch-id" => parsed.batch_id = Some(take_value(args, "--batch-id")?),
            "-h" | "--help" => return Ok(None),
            other => anyhow::bail!("unexpected argument: {other}"),
        }
    }
    Ok(Some(parsed))
}

async fn open_ledger(database_url: Option<String>) -> anyhow::Result<SqliteLedger> {
    let database_url = require_database_url(database_url)?;
    let ledger = SqliteLedger::connect(&database_url).await?;
    ledger.initialize().await?;
    Ok(ledger)
}

fn require_batch_id(batch_id: Option<String>) -> anyhow::Result<BatchId> {
    batch_id
        .filter(|id| !id.trim().is_empty())
        .map(BatchId::new)
        .ok_or_else(|| anyhow::anyhow!("--batch-id is required"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    let config = Config::from_env()?;

    match command.as_str() {
        "migrate" => {
            let Some(opts) = parse_batch_args(&mut args)? else {
                print_help();
                return Ok(());
            };
            open_ledger(opts.database_url).await?;
            println!("ok: migrations applied");
            Ok(())
        }
        "validate" => {
            let mut file: Option<String> = None;
            let mut mime: Option<String> = None;
            let mut score = NEUTRAL_AUTHENTICITY_SCORE;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--file" => file = Some(take_value(&mut args, "--file")?),
                    "--mime" => mime = Some(take_value(&mut args, "--mime")?),
                    "--score" => score = take_value(&mut args, "--score")?.parse()?,
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let file = file.ok_or_else(|| anyhow::anyhow!("--file is required"))?;
            let mime = mime.ok_or_else(|| anyhow::anyhow!("--mime is required"))?;
            let content = tokio::fs::read(&file).await?;

            let report = FormatValidator::new(config.format).validate(&content, &mime);
            let quality = visual_quality_score(content.len(), report.integrity_valid);
            let result = PolicyEngine::new(config.thresholds).decide(PolicyInput {
                format: &report,
                content_hash: fingerprint(&content),
                authenticity_score: score,
                visual_quality: quality,
            });

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "file": file,
                    "bytes": content.len(),
                    "format": report,
                    "result": result,
                }))?
            );
            Ok(())
        }
        "ledger-records" => {
            let Some(opts) = parse_batch_args(&mut args)? else {
                print_help();
                return Ok(());
            };
            let batch_id = require_batch_id(opts.batch_id)?;
            let ledger = open_ledger(opts.database_url).await?;

            let records = ledger.records_for_batch(&batch_id).await?;
            for record in &records {
                println!("{}", serde_json::to_string(record)?);
            }
            eprintln!("ok: {} records", records.len());
            Ok(())
        }
        "certificate" => {
            let Some(opts) = parse_batch_args(&mut args)? else {
                print_help();
                return Ok(());
            };
            let batch_id = require_batch_id(opts.batch_id)?;
            let ledger = open_ledger(opts.database_url).await?;

            match ledger.certificate_for_batch(&batch_id).await? {
                Some(certificate) => {
                    println!("{}", serde_json::to_string_pretty(&certificate)?);
                    if !certificate.verify_hash() {
                        anyhow::bail!("certificate hash does not match its transaction list");
                    }
                    Ok(())
                }
                None => anyhow::bail!("no certificate recorded for batch {batch_id}"),
            }
        }
        "rebuild" => {
            let Some(opts) = parse_batch_args(&mut args)? else {
                print_help();
                return Ok(());
            };
            let batch_id = require_batch_id(opts.batch_id)?;
            let ledger = open_ledger(opts.database_url).await?;

            let machine = CertificationStateMachine::new(
                Arc::new(ledger),
                config.certification(),
                Arc::new(MetricsRegistry::new()),
            );
            let rebuilt = machine.rebuild_from_ledger(&batch_id).await?;
            println!("{}", serde_json::to_string_pretty(&rebuilt)?);
            eprintln!(
                "ok: state {} ({} verified images)",
                rebuilt.state(),
                rebuilt.verified_total()
            );
            Ok(())
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}")
        }
    }
}
