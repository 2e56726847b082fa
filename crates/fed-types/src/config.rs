// Coordinator configuration. Plain structs with defaults, optionally
// overridden from the environment.

use std::time::Duration;

use crate::error::TypesError;
use crate::range::WorkerAddress;

// ── Execution mode ────────────────────────────────────────────────────────────

/// Backing engine used by workers for rewritten instructions.
///
/// `Bulk` engines need the result variable to exist before an append
/// instruction writes into it, so the append rewriter stores a placeholder
/// under the result id in the same dispatch phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Single,
    Bulk,
}

impl std::str::FromStr for ExecutionMode {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" | "cp" => Ok(Self::Single),
            "bulk" | "spark" => Ok(Self::Bulk),
            other => Err(TypesError::Config(format!("unknown execution mode: {other}"))),
        }
    }
}

// ── Federation ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FederationConfig {
    pub execution_mode: ExecutionMode,

    /// Worker that receives coordinator-local data when it must be turned
    /// into a single-partition federation. Default: `localhost:8001`.
    pub local_worker: WorkerAddress,

    /// Upper bound on one worker's batch round-trip. Default: 60 s.
    pub dispatch_timeout: Duration,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Single,
            local_worker: WorkerAddress::new("localhost", 8001),
            dispatch_timeout: Duration::from_secs(60),
        }
    }
}

impl FederationConfig {
    /// Defaults, overridden by `FED_EXEC_MODE`, `FED_LOCAL_WORKER` and
    /// `FED_DISPATCH_TIMEOUT_SECS` when set.
    pub fn from_env() -> Result<Self, TypesError> {
        let mut cfg = Self::default();

        if let Ok(mode) = std::env::var("FED_EXEC_MODE") {
            cfg.execution_mode = mode.parse()?;
        }
        if let Ok(addr) = std::env::var("FED_LOCAL_WORKER") {
            cfg.local_worker = addr.parse()?;
        }
        if let Ok(secs) = std::env::var("FED_DISPATCH_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| TypesError::Config(format!("invalid timeout: {secs}")))?;
            cfg.dispatch_timeout = Duration::from_secs(secs);
        }

        Ok(cfg)
    }
}
