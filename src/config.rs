//! Run configuration
//!
//! [`RotateArgs`] is the raw CLI/environment surface. Every option also reads
//! the `PLUGIN_*` variable a Drone or Harness plugin step sets. It is
//! validated into a [`RotationConfig`] before any external call is made.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, ValueEnum};

use crate::cluster::ServiceAccountRef;
use crate::harness::{
    secret_identifier, HarnessClientConfig, Scope, DEFAULT_DESCRIPTION, DEFAULT_HARNESS_URL,
    DEFAULT_SECRET_MANAGER,
};
use crate::retry::PollConfig;
use crate::{Error, DEFAULT_NAMESPACE, DEFAULT_SERVICE_ACCOUNT};

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Rotation arguments
#[derive(Args, Debug, Clone)]
pub struct RotateArgs {
    /// Namespace of the service account to rotate
    #[arg(long, env = "PLUGIN_K8S_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub k8s_namespace: String,

    /// Service account to rotate
    #[arg(long, env = "PLUGIN_K8S_SERVICE_ACCOUNT", default_value = DEFAULT_SERVICE_ACCOUNT)]
    pub k8s_service_account: String,

    /// Path to kubeconfig (in-cluster config is inferred when unset)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Harness platform API key
    #[arg(long, env = "PLUGIN_HARNESS_API_KEY", hide_env_values = true)]
    pub harness_api_key: Option<String>,

    /// Harness account identifier
    #[arg(long, env = "PLUGIN_HARNESS_ACCOUNT")]
    pub harness_account: Option<String>,

    /// Harness organization identifier (account scope when unset)
    #[arg(long, env = "PLUGIN_HARNESS_ORG")]
    pub harness_org: Option<String>,

    /// Harness project identifier (requires --harness-org)
    #[arg(long, env = "PLUGIN_HARNESS_PROJECT")]
    pub harness_project: Option<String>,

    /// Harness host or base URL
    #[arg(long, env = "PLUGIN_HARNESS_URL", default_value = DEFAULT_HARNESS_URL)]
    pub harness_url: String,

    /// Harness secret identifier (defaults to <namespace>-<service account>)
    #[arg(long, env = "PLUGIN_SECRET_IDENTIFIER")]
    pub secret_identifier: Option<String>,

    /// Tags for the Harness secret, as a JSON object of strings
    #[arg(long, env = "PLUGIN_SECRET_TAGS", default_value = "{}")]
    pub secret_tags: String,

    /// Description for the Harness secret
    #[arg(long, env = "PLUGIN_SECRET_DESCRIPTION", default_value = DEFAULT_DESCRIPTION)]
    pub secret_description: String,

    /// Harness secret manager holding the value
    #[arg(long, env = "PLUGIN_SECRET_MANAGER", default_value = DEFAULT_SECRET_MANAGER)]
    pub secret_manager: String,

    /// Delete the service account's older token secrets after publishing
    #[arg(
        long,
        env = "PLUGIN_DELETE_K8S_SECRETS",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub delete_k8s_secrets: bool,

    /// Reads of the new secret before giving up on its token
    #[arg(long, env = "PLUGIN_TOKEN_WAIT_ATTEMPTS", default_value_t = crate::retry::DEFAULT_POLL_ATTEMPTS)]
    pub token_wait_attempts: u32,

    /// Delay between token reads, in milliseconds
    #[arg(long, env = "PLUGIN_TOKEN_WAIT_INTERVAL_MS", default_value_t = 1000)]
    pub token_wait_interval_ms: u64,

    /// Step output file (created_token, updated_secret)
    #[arg(long, env = "DRONE_OUTPUT", default_value = "DRONE_OUTPUT.env")]
    pub output_file: PathBuf,

    /// Secret step output file (token)
    #[arg(
        long,
        env = "HARNESS_OUTPUT_SECRET_FILE",
        default_value = "HARNESS_OUTPUT_SECRET.env"
    )]
    pub secret_output_file: PathBuf,
}

/// Validated configuration for one rotation run
#[derive(Clone, Debug)]
pub struct RotationConfig {
    /// Service account to rotate
    pub service_account: ServiceAccountRef,
    /// Destination scope
    pub scope: Scope,
    /// Destination secret identifier
    pub identifier: String,
    /// Tags written on the destination secret
    pub tags: BTreeMap<String, String>,
    /// Whether superseded token secrets are deleted
    pub delete_old_secrets: bool,
}

impl RotationConfig {
    /// Minimal config targeting `service_account` with the derived identifier
    pub fn new(service_account: ServiceAccountRef, scope: Scope) -> Self {
        Self {
            identifier: secret_identifier(&service_account),
            service_account,
            scope,
            tags: BTreeMap::new(),
            delete_old_secrets: false,
        }
    }
}

impl RotateArgs {
    /// Validate into the workflow configuration
    pub fn rotation_config(&self) -> Result<RotationConfig, Error> {
        let namespace = non_empty("k8s_namespace", &self.k8s_namespace)?;
        let name = non_empty("k8s_service_account", &self.k8s_service_account)?;
        let service_account = ServiceAccountRef::new(namespace, name);

        let scope = Scope::new(
            required("harness_account", &self.harness_account)?,
            self.harness_org.clone(),
            self.harness_project.clone(),
        )?;

        let identifier = match self.secret_identifier.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => secret_identifier(&service_account),
        };

        Ok(RotationConfig {
            service_account,
            scope,
            identifier,
            tags: parse_tags(&self.secret_tags)?,
            delete_old_secrets: self.delete_k8s_secrets,
        })
    }

    /// Settings for the Harness client
    pub fn harness_client_config(&self) -> Result<HarnessClientConfig, Error> {
        Ok(HarnessClientConfig {
            url: non_empty("harness_url", &self.harness_url)?.to_string(),
            api_key: required("harness_api_key", &self.harness_api_key)?.to_string(),
            description: self.secret_description.clone(),
            secret_manager: non_empty("secret_manager", &self.secret_manager)?.to_string(),
        })
    }

    /// Token-readiness poll bounds
    pub fn poll_config(&self) -> Result<PollConfig, Error> {
        if self.token_wait_attempts == 0 {
            return Err(Error::validation("token_wait_attempts must be at least 1"));
        }
        Ok(PollConfig::fixed(
            self.token_wait_attempts,
            Duration::from_millis(self.token_wait_interval_ms),
        ))
    }
}

fn required<'a>(option: &str, value: &'a Option<String>) -> Result<&'a str, Error> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::validation(format!("{option} required"))),
    }
}

fn non_empty<'a>(option: &str, value: &'a str) -> Result<&'a str, Error> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::validation(format!("{option} must not be empty")));
    }
    Ok(value)
}

/// Parse `secret_tags`: a JSON object whose values are all strings
pub fn parse_tags(raw: &str) -> Result<BTreeMap<String, String>, Error> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(raw).map_err(|e| {
        Error::validation(format!(
            "secret_tags must be a JSON object of string values: {e}"
        ))
    })
}
