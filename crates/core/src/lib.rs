//! Session orchestration for an ad-hoc database workbench: probe a login,
//! list its databases, run one statement at a time with cooperative
//! cancellation, save tabular results as CSV and hand the file to a local
//! executable.

pub mod audit_trail;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod export;
pub mod invocation;
pub mod query;
pub mod result;
pub mod settings;
pub mod workbench;

pub use error::{GuardError, WorkflowError};
pub use result::QueryResult;
pub use workbench::{CredentialField, PlannedInvocation, Workbench};
