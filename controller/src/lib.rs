pub mod api;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod evaluator;
pub mod ledger;
pub mod node;
pub mod reconcile;
pub mod registry;
pub mod speed;
pub mod store;

pub use control_plane::{ControlPlane, GrantStatusView, LoadSummary};
pub use error::{ConsistencyError, ControllerError, NodeCommandError, Result};
pub use evaluator::{ExpiryOutlook, evaluate, expiry_outlook};
pub use ledger::{QuotaLedger, ResetSchedule, UsageResult, UsageSnapshot};
pub use node::{LoggingCommander, NodeCommander};
pub use reconcile::{ReconcileOutcome, Reconciler, RetryConfig, SweepReport};
pub use speed::SpeedRuleResolver;
