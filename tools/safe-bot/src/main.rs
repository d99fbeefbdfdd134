use std::{path::PathBuf, sync::Arc, time::Duration};

use alloy_primitives::{Address, Bytes, B256, U256};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use safe_coordinator::{
    BuildRequest, CancelToken, ChainReceipt, CoordinatorConfig, CoordinatorContext, Lifecycle,
    LifecycleReport, PendingScanner, ScanOutcome, ScanReport,
};
use safe_tx_types::Operation;
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod report;

use report::{write_json_atomic, RunReport};

/// Drive Safe multisig transactions: propose, collect confirmations, execute.
///
/// Configuration comes from the environment (optionally a `.env` file); see
/// `CoordinatorConfig` for the keys.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Dotenv file loaded before reading the environment. Missing is fine.
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Where to write the JSON run report.
    #[arg(long, global = true, env = "REPORT_PATH")]
    report_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Owners, threshold, nonce and balance of the wallet.
    Status,

    /// Inspect or grant the bot's allow-list permission.
    Permission {
        #[command(subcommand)]
        action: PermissionAction,
    },

    /// Build, sign and propose a transaction, then wait for quorum and execute it.
    Propose(ProposeArgs),

    /// Resume an existing proposal: wait for quorum and execute it.
    Watch {
        /// `safeTxHash` of the proposal.
        #[arg(value_parser = parse_b256)]
        safe_tx_hash: B256,
    },

    /// Co-sign and execute open proposals.
    Scan {
        /// Seconds between passes.
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,

        /// Run a single pass and exit.
        #[arg(long)]
        once: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PermissionAction {
    Check,
    Grant,
}

#[derive(clap::Args, Debug)]
struct ProposeArgs {
    #[arg(long, value_parser = parse_address)]
    to: Address,

    /// Wei, decimal or 0x-hex.
    #[arg(long, default_value = "0", value_parser = parse_u256)]
    value: U256,

    /// Calldata as 0x-hex.
    #[arg(long, default_value = "0x", value_parser = parse_bytes)]
    data: Bytes,

    #[arg(long)]
    delegate_call: bool,

    /// Permit `--to 0x0000000000000000000000000000000000000000`.
    #[arg(long)]
    allow_null_target: bool,
}

// alloy's `From<String>` impls would win clap's auto-detection and keep the raw text.
fn parse_bytes(s: &str) -> Result<Bytes, String> {
    s.parse::<Bytes>().map_err(|e| e.to_string())
}

fn parse_address(s: &str) -> Result<Address, String> {
    s.parse::<Address>().map_err(|e| e.to_string())
}

fn parse_u256(s: &str) -> Result<U256, String> {
    s.parse::<U256>().map_err(|e| e.to_string())
}

fn parse_b256(s: &str) -> Result<B256, String> {
    s.parse::<B256>().map_err(|e| e.to_string())
}

impl ProposeArgs {
    fn request(&self) -> BuildRequest {
        let mut request = BuildRequest::call(self.to, self.value, self.data.clone());
        if self.delegate_call {
            request = request.with_operation(Operation::DelegateCall);
        }
        if self.allow_null_target {
            request = request.allow_null_target();
        }
        request
    }
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::Permission {
                action: PermissionAction::Check,
            } => "permission-check",
            Command::Permission {
                action: PermissionAction::Grant,
            } => "permission-grant",
            Command::Propose(_) => "propose",
            Command::Watch { .. } => "watch",
            Command::Scan { .. } => "scan",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.env_file.exists() {
        dotenv::from_path(&cli.env_file)
            .with_context(|| format!("failed loading {}", cli.env_file.display()))?;
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next tick");
            trigger.cancel();
        }
    });

    let mut report = RunReport::new(cli.command.name());
    let outcome = run(&cli, &cancel, &mut report).await;
    let value = match &outcome {
        Ok(result) => report.succeed(result.clone()),
        Err(err) => report.fail(err),
    };
    if let Some(path) = &cli.report_path {
        write_json_atomic(path, &value)?;
        info!(path = %path.display(), "report written");
    }

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run(cli: &Cli, cancel: &CancelToken, report: &mut RunReport) -> Result<Value> {
    let config = CoordinatorConfig::from_env().context("invalid configuration")?;
    let ctx = Arc::new(
        CoordinatorContext::connect(&config)
            .await
            .context("failed connecting to the chain")?,
    );
    report.set("safe", json!(ctx.domain.safe));
    report.set("chain_id", json!(ctx.domain.chain_id));
    report.set("owner", json!(ctx.executor()));

    match &cli.command {
        Command::Status => Ok(serde_json::to_value(ctx.status().await?)?),
        Command::Permission { action } => {
            let base = json!({
                "executor": ctx.executor(),
                "target": ctx.domain.safe,
                "selector": config.permission_selector,
            });
            match action {
                PermissionAction::Check => {
                    let allowed = ctx.check_permission().await?;
                    Ok(merge(base, json!({ "allowed": allowed })))
                }
                PermissionAction::Grant => {
                    let receipt = ctx.grant_permission().await?;
                    Ok(merge(base, json!({ "receipt": receipt_json(&receipt) })))
                }
            }
        }
        Command::Propose(args) => {
            let outcome = Lifecycle::new(ctx).run(args.request(), cancel).await?;
            Ok(lifecycle_json(&outcome))
        }
        Command::Watch { safe_tx_hash } => {
            let outcome = Lifecycle::new(ctx)
                .resume(*safe_tx_hash, cancel)
                .await
                .with_context(|| format!("resume {safe_tx_hash}"))?;
            Ok(lifecycle_json(&outcome))
        }
        Command::Scan {
            interval_secs,
            once,
        } => {
            let scanner = PendingScanner::new(ctx);
            if *once {
                scanner.start_check().await?;
                Ok(scan_json(&scanner.scan_once().await?))
            } else {
                let passes = scanner
                    .run(Duration::from_secs(*interval_secs), cancel)
                    .await?;
                Ok(json!({ "passes": passes }))
            }
        }
    }
}

fn merge(mut base: Value, extra: Value) -> Value {
    if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), extra) {
        base.extend(extra);
    }
    base
}

fn receipt_json(receipt: &ChainReceipt) -> Value {
    json!({
        "tx_hash": receipt.tx_hash,
        "block_number": receipt.block_number,
        "gas_used": receipt.gas_used,
        "effective_gas_price": receipt.effective_gas_price,
    })
}

fn lifecycle_json(outcome: &LifecycleReport) -> Value {
    json!({
        "safe_tx_hash": outcome.safe_tx_hash,
        "nonce": outcome.nonce,
        "submission": outcome.submission.map(|k| format!("{k:?}")),
        "signers": outcome.signers,
        "poll_attempts": outcome.poll_attempts,
        "receipt": receipt_json(&outcome.receipt),
    })
}

fn scan_json(scan: &ScanReport) -> Value {
    let entries: Vec<Value> = scan
        .entries
        .iter()
        .map(|e| {
            let outcome = match &e.outcome {
                ScanOutcome::Stale => json!({ "status": "stale" }),
                ScanOutcome::Busy => json!({ "status": "busy" }),
                ScanOutcome::Waiting {
                    confirmations,
                    threshold,
                } => json!({
                    "status": "waiting",
                    "confirmations": confirmations,
                    "threshold": threshold,
                }),
                ScanOutcome::Queued => json!({ "status": "queued" }),
                ScanOutcome::Executed { tx_hash } => {
                    json!({ "status": "executed", "tx_hash": tx_hash })
                }
                ScanOutcome::Failed(err) => json!({ "status": "failed", "error": err.to_string() }),
            };
            json!({
                "safe_tx_hash": e.safe_tx_hash,
                "nonce": e.nonce,
                "cosigned": e.cosigned,
                "outcome": outcome,
            })
        })
        .collect();
    json!({
        "starting_nonce": scan.starting_nonce,
        "executed": scan.executed(),
        "failed": scan.failed(),
        "entries": entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_propose_arguments() {
        let cli = Cli::try_parse_from([
            "safe-bot",
            "propose",
            "--to",
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf",
            "--value",
            "1000000000000000",
            "--data",
            "0xa9059cbb",
        ])
        .unwrap();
        let Command::Propose(args) = &cli.command else {
            panic!("expected propose");
        };
        let request = args.request();
        assert_eq!(request.value, U256::from(1_000_000_000_000_000u64));
        assert_eq!(request.data.as_ref(), &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(request.operation, Operation::Call);
        assert!(!request.allow_null_target);
        assert_eq!(cli.command.name(), "propose");
    }

    #[test]
    fn propose_defaults_and_hex_value() {
        let cli = Cli::try_parse_from([
            "safe-bot",
            "propose",
            "--to",
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf",
            "--value",
            "0x10",
        ])
        .unwrap();
        let Command::Propose(args) = &cli.command else {
            panic!("expected propose");
        };
        assert!(args.data.is_empty());
        assert_eq!(args.value, U256::from(16u64));
        assert_eq!(
            args.to,
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf".parse::<Address>().unwrap()
        );

        let bad = Cli::try_parse_from([
            "safe-bot",
            "propose",
            "--to",
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf",
            "--data",
            "not-hex",
        ]);
        assert!(bad.is_err());
    }

    #[test]
    fn parses_watch_and_scan() {
        let hash = "0x1e2f01c1244f61ecbecd6f9d60b142ca0249d2ef18357d6a0c96e6e9f292bcd2";
        let cli = Cli::try_parse_from(["safe-bot", "watch", hash, "--report-path", "out.json"])
            .unwrap();
        let Command::Watch { safe_tx_hash } = &cli.command else {
            panic!("expected watch");
        };
        assert_eq!(*safe_tx_hash, hash.parse::<B256>().unwrap());
        assert_eq!(safe_tx_hash[0], 0x1e);
        assert_eq!(cli.report_path, Some(PathBuf::from("out.json")));

        let cli = Cli::try_parse_from(["safe-bot", "scan", "--once"]).unwrap();
        assert!(matches!(cli.command, Command::Scan { once: true, interval_secs: 30 }));
        assert!(Cli::try_parse_from(["safe-bot", "watch", "0x1234"]).is_err());
    }

    #[test]
    fn merge_adds_fields() {
        let merged = merge(json!({ "a": 1 }), json!({ "b": 2 }));
        assert_eq!(merged, json!({ "a": 1, "b": 2 }));
    }
}
