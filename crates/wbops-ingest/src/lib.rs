//! Ingestion control plane: the job registry, the run orchestration service
//! (exclusion, stuck detection, heartbeat-aware sleeping), the job runners,
//! the per-tenant scheduler tick, the queued-run worker, and the stale-run
//! sweeper.

pub mod context;
pub mod credentials;
pub mod error;
pub mod heartbeat;
pub mod internal_sync;
pub mod registry;
pub mod runners;
pub mod runs;
pub mod scheduler;
pub mod sweeper;
pub mod worker;

pub use context::RunContext;
pub use credentials::{resolve_wb_token, ResolvedCredentials};
pub use error::IngestError;
pub use heartbeat::sleep_with_heartbeat;
pub use internal_sync::{sync_now, SyncReport};
pub use registry::{JobOutcome, JobRegistry, JobSpec};
pub use runs::{create_queued, start_with_stale_retry};
pub use scheduler::{tick, TickReport};
pub use sweeper::sweep;
pub use worker::{execute_and_finalize, finalize_outcome, Worker};
