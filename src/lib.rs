//! harness-sa-rotator - rotate a Kubernetes service-account token into Harness
//!
//! A single run mints a new token secret bound to a service account, publishes
//! the token to the Harness secret manager under a deterministic identifier,
//! and optionally deletes the older token secrets of that service account.
//!
//! # Modules
//!
//! - [`cluster`] - Token secret operations against the Kubernetes API
//! - [`harness`] - Harness secret manager client
//! - [`workflow`] - Mint → publish → cleanup orchestration
//! - [`config`] - CLI/env arguments and validated run configuration
//! - [`retry`] - Bounded polling for token readiness
//! - [`outputs`] - Pipeline step output files
//! - [`rbac`] - Role/RoleBinding manifests for running the rotator
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod harness;
pub mod outputs;
pub mod rbac;
pub mod retry;
pub mod telemetry;
pub mod workflow;

pub use error::{Error, RotationError, Stage};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default namespace of the rotated service account
pub const DEFAULT_NAMESPACE: &str = "harness-delegate-ng";

/// Default name of the rotated service account
pub const DEFAULT_SERVICE_ACCOUNT: &str = "harness-delegate-ng";

/// Secret type the token controller populates with a bearer token
pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

/// Annotation binding a token secret to its service account
pub const SA_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";

/// Data key holding the token in a service-account token secret
pub const TOKEN_DATA_KEY: &str = "token";

/// Label key marking secrets minted by this tool
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label value marking secrets minted by this tool
pub const MANAGED_BY_VALUE: &str = "harness-sa-rotator";
