use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use deed_escrow::{
    scenario::{Scenario, ScenarioError, StepOutcome},
    units::{format_units, parse_units, UnitsError},
    Signer,
};
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser)]
#[command(name = "deed-escrow", version, about = "Property-token escrow ledger")]
struct Cli {
    /// trace | debug | info | warn | error | off
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a scenario file against a fresh chain.
    Run {
        scenario: PathBuf,
        /// Write the final state snapshot as JSON.
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Write committed receipts as JSON lines.
        #[arg(long)]
        receipts: Option<PathBuf>,
    },
    /// Generate an ed25519 keypair and its address.
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Convert between ether decimals and base units.
    Units {
        #[command(subcommand)]
        op: UnitsOp,
    },
}

#[derive(Subcommand)]
enum UnitsOp {
    /// "0.02" -> 20000000000000000
    Parse { amount: String },
    /// 20000000000000000 -> "0.02"
    Format { base_units: u128 },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Units(#[from] UnitsError),
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json encoding: {0}")]
    Json(#[from] serde_json::Error),
}

fn write_all(path: &Path, bytes: &[u8]) -> Result<(), CliError> {
    let io_err = |source| CliError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut f = fs::File::create(path).map_err(io_err)?;
    f.write_all(bytes).map_err(io_err)
}

fn run_cmd(
    scenario: &Path,
    snapshot: Option<&Path>,
    receipts: Option<&Path>,
) -> Result<(), CliError> {
    let report = Scenario::load(scenario)?.run()?;

    for step in &report.steps {
        match &step.outcome {
            StepOutcome::Committed {
                height,
                created,
                minted,
            } => {
                let mut line = format!(
                    "[{:>3}] {:<10} {:<24} ok  height={}",
                    step.index, step.from, step.action, height
                );
                if let Some(address) = created {
                    line.push_str(&format!(" created={address}"));
                }
                if let Some(token_id) = minted {
                    line.push_str(&format!(" token={token_id}"));
                }
                println!("{line}");
            }
            StepOutcome::Rejected { kind, error } => println!(
                "[{:>3}] {:<10} {:<24} rejected ({kind:?}): {error}",
                step.index, step.from, step.action
            ),
        }
    }

    let snap = report.chain.snapshot();
    for (name, address) in &report.names {
        let balance = report.chain.balance_of(address);
        println!("{name:<12} {address} {} ETH", format_units(balance));
    }
    println!("height     {}", snap.height);
    println!("state root {}", hex::encode(snap.state_root));

    if let Some(path) = snapshot {
        write_all(path, &serde_json::to_vec_pretty(&snap)?)?;
        println!("snapshot → {}", path.display());
    }
    if let Some(path) = receipts {
        let mut out = Vec::new();
        for receipt in report.chain.receipts() {
            out.extend(serde_json::to_vec(receipt)?);
            out.push(b'\n');
        }
        write_all(path, &out)?;
        println!("receipts → {}", path.display());
    }
    Ok(())
}

fn keygen_cmd(out_dir: &Path) -> Result<(), CliError> {
    let signer = Signer::random();
    write_all(&out_dir.join("sk.hex"), signer.secret_hex().as_bytes())?;
    write_all(&out_dir.join("pk.hex"), signer.public_hex().as_bytes())?;
    write_all(
        &out_dir.join("address.txt"),
        signer.address().to_string().as_bytes(),
    )?;
    println!("keypair written → {}", out_dir.display());
    println!("address {}", signer.address());
    Ok(())
}

fn execute(command: Command) -> Result<(), CliError> {
    match command {
        Command::Run {
            scenario,
            snapshot,
            receipts,
        } => run_cmd(&scenario, snapshot.as_deref(), receipts.as_deref()),
        Command::Keygen { out_dir } => keygen_cmd(&out_dir),
        Command::Units { op } => {
            match op {
                UnitsOp::Parse { amount } => println!("{}", parse_units(&amount)?),
                UnitsOp::Format { base_units } => println!("{}", format_units(base_units)),
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .init();

    match execute(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
