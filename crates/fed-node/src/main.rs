//! fed-node binary: runs federated rewrites against an in-process cluster.
//!
//! ```bash
//! # 100x50 matrix over four workers, column-append a local 100x10 block
//! RUST_LOG=info cargo run --bin fed-node -- cbind-local
//!
//! # rows 31..70 (1-based, inclusive) of the same matrix
//! cargo run --bin fed-node -- slice --from 31 --to 70
//!
//! # bulk execution mode, debug logging of every batch
//! RUST_LOG=fed_dispatch=debug cargo run --bin fed-node -- --bulk cbind-local
//! ```
//!
//! Each run prints the requests every worker received, in arrival order,
//! followed by the partition map of the result as JSON.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fed_dispatch::{
    ExecutionContext, FedCoordinator, FedObject, FedRuntime, LoopbackCluster, RequestPayload,
};
use fed_types::{DenseBlock, ExecutionMode, FederationConfig, LocalData, WorkerAddress};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "fed-node",
    version = env!("CARGO_PKG_VERSION"),
    about   = "Federated instruction dispatch against a loopback cluster"
)]
struct Cli {
    /// Number of workers holding row partitions of the input.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Rows of the federated input.
    #[arg(long, default_value_t = 100)]
    rows: u64,

    /// Columns of the federated input.
    #[arg(long, default_value_t = 50)]
    cols: u64,

    /// Use the bulk execution mode regardless of FED_EXEC_MODE.
    #[arg(long)]
    bulk: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Column-append a coordinator-local matrix.
    CbindLocal {
        #[arg(long, default_value_t = 10)]
        local_cols: u64,
    },

    /// Row-append a coordinator-local matrix.
    Rbind {
        #[arg(long, default_value_t = 10)]
        local_rows: u64,
    },

    /// Read rows `from..=to` (1-based) over all columns.
    Slice {
        #[arg(long)]
        from: u64,
        #[arg(long)]
        to: u64,
    },

    /// Overwrite rows `from..=to` (1-based) with a local block.
    Assign {
        #[arg(long)]
        from: u64,
        #[arg(long)]
        to: u64,
        /// Columns of the assigned block; defaults to the full width.
        #[arg(long)]
        value_cols: Option<u64>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // Default log level: INFO. Override with RUST_LOG=fed_dispatch=debug etc.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.workers == 0 {
        bail!("--workers must be at least 1");
    }

    let mut config = FederationConfig::from_env().context("reading federation config")?;
    if cli.bulk {
        config.execution_mode = ExecutionMode::Bulk;
    }

    let cluster = Arc::new(LoopbackCluster::new());
    let runtime = FedRuntime::new(cluster.clone(), config);
    let coord = FedCoordinator::new(runtime);

    let mut ec = ExecutionContext::new();
    let workers: Vec<WorkerAddress> = (1..=cli.workers)
        .map(|i| WorkerAddress::new(format!("w{i}"), 8001))
        .collect();
    let input = matrix(cli.rows, cli.cols);
    let map = cluster.partition_rows(coord.runtime().next_id(), &input, &workers)?;
    ec.set_object("X", FedObject::federated(map, input.data_type(), cli.rows, cli.cols));

    let instruction = match cli.command {
        Command::CbindLocal { local_cols } => {
            ec.set_object("Y", FedObject::local(matrix(cli.rows, local_cols)));
            "FED°append°X·MATRIX·FP64°Y·MATRIX·FP64°Z·MATRIX·FP64°true".to_string()
        }
        Command::Rbind { local_rows } => {
            ec.set_object("Y", FedObject::local(matrix(local_rows, cli.cols)));
            "FED°append°X·MATRIX·FP64°Y·MATRIX·FP64°Z·MATRIX·FP64°false".to_string()
        }
        Command::Slice { from, to } => format!(
            "FED°rightIndex°X·MATRIX·FP64°{}°{}°{}°{}°Z·MATRIX·FP64",
            literal(from),
            literal(to),
            literal(1),
            literal(cli.cols)
        ),
        Command::Assign { from, to, value_cols } => {
            let value_cols = value_cols.unwrap_or(cli.cols);
            ec.set_object("Y", FedObject::local(matrix((to + 1).saturating_sub(from), value_cols)));
            format!(
                "FED°leftIndex°X·MATRIX·FP64°Y·MATRIX·FP64°{}°{}°{}°{}°Z·MATRIX·FP64",
                literal(from),
                literal(to),
                literal(1),
                literal(cli.cols)
            )
        }
    };

    info!(%instruction, "submitting");
    let kind = coord.process(&mut ec, &instruction).await?;

    println!("── requests ({kind}) ──");
    for entry in cluster.log() {
        let req = &entry.request;
        let detail = match &req.payload {
            RequestPayload::Instruction(text) => text.clone(),
            RequestPayload::Data(data) => format!("{}x{} {}", data.rows(), data.cols(), data.data_type()),
            RequestPayload::Placeholder { data_type } => format!("placeholder {data_type}"),
            RequestPayload::None => String::new(),
        };
        println!("{:<12} {:<8} {:>5}  {detail}", entry.worker.to_string(), req.kind.to_string(), req.id);
    }

    let out = ec.object("Z")?;
    println!("── result {}x{} ──", out.rows, out.cols);
    println!("{}", serde_json::to_string_pretty(out.fed_map()?)?);
    Ok(())
}

fn matrix(rows: u64, cols: u64) -> LocalData {
    LocalData::Matrix(DenseBlock::from_fn(rows, cols, |r, c| (r * cols + c) as f64))
}

fn literal(v: u64) -> String {
    format!("{v}·SCALAR·INT64·true")
}
