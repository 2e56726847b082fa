//! `fed-dispatch`: federated instruction dispatch.
//!
//! This crate is a **coordination layer**. Matrices and frames live on
//! remote workers as disjoint partitions; the coordinator only holds a
//! [`FederationMap`] per object. Rust decides which worker receives which
//! rewritten instruction or data slice, in what order, and what the
//! resulting partition map looks like. Kernels run on the workers.
//!
//! # Flow
//!
//! ```text
//!   instruction ──▶ FedCoordinator ──▶ FedInstruction::process
//!                                            │ rewrite per partition
//!                                            ▼
//!                        FederationMap::execute(phases) ──▶ FederatedClient
//!                                            │              (one batch per worker)
//!                                            ▼
//!                         output FedObject with a new map
//! ```

pub mod client;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod ident;
pub mod loopback;
pub mod map;
pub mod request;
pub mod rewrite;
pub mod runtime;
pub mod transport;

// ── Public re-exports ────────────────────────────────────────────────────────

pub use client::FederatedClient;
pub use context::{ExecutionContext, FedObject, ScalarValue, Variable};
pub use coordinator::FedCoordinator;
pub use error::{FedError, Result};
pub use ident::{AtomicIdAllocator, IdAllocator};
pub use loopback::{LoggedRequest, LoopbackCluster, StoredValue};
pub use map::{federate_local_data, FederatedData, FederationMap, Partition};
pub use request::{FederatedRequest, FederatedResponse, RequestPayload, RequestSet, RequestType, ResponseStatus};
pub use rewrite::{FedInstruction, OpKind};
pub use runtime::FedRuntime;
pub use transport::{decode_request_batch, decode_response_batch, encode_request_batch, encode_response_batch};
