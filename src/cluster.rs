//! Service-account token secrets in the cluster
//!
//! Provides a trait-based abstraction over the three cluster operations the
//! rotation needs (mint, list, delete) so the workflow can be tested without a
//! Kubernetes API server.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info, warn};

use crate::retry::{poll_until_ready, PollConfig};
use crate::{
    Error, MANAGED_BY_LABEL, MANAGED_BY_VALUE, SA_NAME_ANNOTATION, SERVICE_ACCOUNT_TOKEN_TYPE,
    TOKEN_DATA_KEY,
};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Namespace/name pair identifying a service account
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceAccountRef {
    /// Namespace the service account lives in
    pub namespace: String,
    /// Service account name
    pub name: String,
}

impl ServiceAccountRef {
    /// Create a reference from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceAccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Bearer token value. `Debug` never prints the contents.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    /// Wrap a token value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw token value
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True when no token has been populated
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("SecretToken(<empty>)")
        } else {
            f.write_str("SecretToken(<redacted>)")
        }
    }
}

/// A token-bearing secret bound to a service account
#[derive(Clone, Debug, PartialEq)]
pub struct TokenSecret {
    /// Secret name (server-generated for minted secrets)
    pub name: String,
    /// Service account the secret is bound to
    pub service_account: ServiceAccountRef,
    /// Token value; empty if the token controller has not populated it yet
    pub token: SecretToken,
    /// Cluster creation timestamp
    pub created_at: Option<DateTime<Utc>>,
}

/// Trait abstracting service-account token secret operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterSecretManager: Send + Sync {
    /// Mint a new token secret bound to `sa` and wait for its token.
    ///
    /// Fails with [`Error::Binding`] if the service account does not exist and
    /// [`Error::TokenNotReady`] if the token is not populated in time.
    async fn create(&self, sa: &ServiceAccountRef) -> Result<TokenSecret, Error>;

    /// Point-in-time list of token secrets bound to `sa`, oldest first
    async fn list_token_secrets(&self, sa: &ServiceAccountRef) -> Result<Vec<TokenSecret>, Error>;

    /// Delete a secret. A secret that is already gone is not an error.
    async fn delete(&self, name: &str, namespace: &str) -> Result<(), Error>;
}

/// [`ClusterSecretManager`] backed by the Kubernetes API
pub struct KubeSecretManager {
    client: Client,
    poll: PollConfig,
    labels: BTreeMap<String, String>,
}

impl KubeSecretManager {
    /// Create a manager using the default token-readiness poll
    pub fn new(client: Client) -> Self {
        Self {
            client,
            poll: PollConfig::default(),
            labels: BTreeMap::new(),
        }
    }

    /// Override the token-readiness poll bounds
    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Extra labels stamped on every minted secret
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    async fn ensure_service_account(&self, sa: &ServiceAccountRef) -> Result<(), Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), &sa.namespace);
        match api.get(&sa.name).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(Error::Binding {
                namespace: sa.namespace.clone(),
                name: sa.name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ClusterSecretManager for KubeSecretManager {
    async fn create(&self, sa: &ServiceAccountRef) -> Result<TokenSecret, Error> {
        self.ensure_service_account(sa).await?;

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &sa.namespace);
        let created = secrets
            .create(&PostParams::default(), &build_token_secret(sa, &self.labels))
            .await?;
        let name = created
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::serialization("created secret has no name"))?;

        info!(
            namespace = %sa.namespace,
            service_account = %sa.name,
            secret = %name,
            "Created service account token secret"
        );

        let ready = poll_until_ready(&self.poll, "wait_for_token", || {
            let secrets = secrets.clone();
            let name = name.clone();
            async move {
                let secret = secrets.get(&name).await?;
                Ok::<_, kube::Error>(token_from_secret(&secret).map(|token| (token, secret)))
            }
        })
        .await;

        match ready {
            Some((token, secret)) => Ok(TokenSecret {
                name,
                service_account: sa.clone(),
                token,
                created_at: creation_time(&secret),
            }),
            None => {
                // a failed mint leaves no half-made credential behind
                if let Err(e) = self.delete(&name, &sa.namespace).await {
                    warn!(
                        namespace = %sa.namespace,
                        secret = %name,
                        error = %e,
                        "Failed to remove token secret that never became ready"
                    );
                }
                Err(Error::TokenNotReady {
                    namespace: sa.namespace.clone(),
                    secret: name,
                    attempts: self.poll.max_attempts.max(1),
                })
            }
        }
    }

    async fn list_token_secrets(&self, sa: &ServiceAccountRef) -> Result<Vec<TokenSecret>, Error> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &sa.namespace);
        let params = ListParams::default().fields(&format!("type={SERVICE_ACCOUNT_TOKEN_TYPE}"));
        let list = secrets.list(&params).await?;

        let mut bound: Vec<TokenSecret> = list
            .items
            .iter()
            .filter(|s| is_bound_to(s, &sa.name))
            .filter_map(|s| to_token_secret(s, sa))
            .collect();
        sort_by_creation(&mut bound);

        debug!(
            namespace = %sa.namespace,
            service_account = %sa.name,
            count = bound.len(),
            "Listed token secrets"
        );
        Ok(bound)
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match secrets.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(namespace = %namespace, secret = %name, "Deleted token secret");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(namespace = %namespace, secret = %name, "Secret already deleted");
                Ok(())
            }
            Err(e) => Err(Error::delete(namespace, name, e.to_string())),
        }
    }
}

/// Create a kube client from an optional kubeconfig path.
///
/// Without a path, config is inferred (in-cluster first, then the default
/// kubeconfig).
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::validation(format!(
                    "failed to read kubeconfig {}: {e}",
                    path.display()
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::validation(format!("failed to load kubeconfig: {e}")))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::validation(format!("failed to infer kube config: {e}")))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Ok(Client::try_from(config)?)
}

/// Build the Secret object that asks the token controller for a new token
pub fn build_token_secret(sa: &ServiceAccountRef, labels: &BTreeMap<String, String>) -> Secret {
    let mut all_labels = labels.clone();
    all_labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());

    Secret {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-token-", sa.name)),
            namespace: Some(sa.namespace.clone()),
            annotations: Some(BTreeMap::from([(
                SA_NAME_ANNOTATION.to_string(),
                sa.name.clone(),
            )])),
            labels: Some(all_labels),
            ..Default::default()
        },
        type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
        ..Default::default()
    }
}

/// True if the secret is a token secret bound to the named service account
pub fn is_bound_to(secret: &Secret, service_account: &str) -> bool {
    secret.type_.as_deref() == Some(SERVICE_ACCOUNT_TOKEN_TYPE)
        && secret
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(SA_NAME_ANNOTATION))
            .is_some_and(|bound| bound == service_account)
}

/// Extract a populated, UTF-8 token from a secret
pub fn token_from_secret(secret: &Secret) -> Option<SecretToken> {
    let bytes = secret.data.as_ref()?.get(TOKEN_DATA_KEY)?;
    if bytes.0.is_empty() {
        return None;
    }
    String::from_utf8(bytes.0.clone()).ok().map(SecretToken)
}

fn creation_time(secret: &Secret) -> Option<DateTime<Utc>> {
    secret.metadata.creation_timestamp.as_ref().map(|t| t.0)
}

fn to_token_secret(secret: &Secret, sa: &ServiceAccountRef) -> Option<TokenSecret> {
    Some(TokenSecret {
        name: secret.metadata.name.clone()?,
        service_account: sa.clone(),
        token: token_from_secret(secret).unwrap_or_default(),
        created_at: creation_time(secret),
    })
}

/// Order secrets oldest first; ties (and missing timestamps) fall back to name
pub fn sort_by_creation(secrets: &mut [TokenSecret]) {
    secrets.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::ByteString;

    fn sa() -> ServiceAccountRef {
        ServiceAccountRef::new("ops", "rotator")
    }

    fn token_secret(name: &str, bound_to: &str, token: Option<&[u8]>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ops".to_string()),
                annotations: Some(BTreeMap::from([(
                    SA_NAME_ANNOTATION.to_string(),
                    bound_to.to_string(),
                )])),
                ..Default::default()
            },
            type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
            data: token.map(|t| {
                BTreeMap::from([(TOKEN_DATA_KEY.to_string(), ByteString(t.to_vec()))])
            }),
            ..Default::default()
        }
    }

    fn listed(name: &str, secs: Option<i64>) -> TokenSecret {
        TokenSecret {
            name: name.to_string(),
            service_account: sa(),
            token: SecretToken::default(),
            created_at: secs.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
        }
    }

    #[test]
    fn minted_secret_requests_a_bound_token() {
        let labels = BTreeMap::from([("harness_account".to_string(), "acct".to_string())]);
        let secret = build_token_secret(&sa(), &labels);

        assert_eq!(secret.type_.as_deref(), Some(SERVICE_ACCOUNT_TOKEN_TYPE));
        assert_eq!(
            secret.metadata.generate_name.as_deref(),
            Some("rotator-token-")
        );
        assert!(secret.metadata.name.is_none());
        assert_eq!(secret.metadata.namespace.as_deref(), Some("ops"));

        let annotations = secret.metadata.annotations.unwrap();
        assert_eq!(annotations[SA_NAME_ANNOTATION], "rotator");

        let labels = secret.metadata.labels.unwrap();
        assert_eq!(labels["harness_account"], "acct");
        assert_eq!(labels[MANAGED_BY_LABEL], MANAGED_BY_VALUE);
        assert!(secret.data.is_none());
    }

    #[test]
    fn binding_requires_matching_annotation_and_type() {
        assert!(is_bound_to(&token_secret("a", "rotator", None), "rotator"));
        assert!(!is_bound_to(&token_secret("a", "other", None), "rotator"));

        let mut opaque = token_secret("a", "rotator", None);
        opaque.type_ = Some("Opaque".to_string());
        assert!(!is_bound_to(&opaque, "rotator"));

        let mut unannotated = token_secret("a", "rotator", None);
        unannotated.metadata.annotations = None;
        assert!(!is_bound_to(&unannotated, "rotator"));
    }

    #[test]
    fn token_is_only_ready_when_populated() {
        assert!(token_from_secret(&token_secret("a", "rotator", None)).is_none());
        assert!(token_from_secret(&token_secret("a", "rotator", Some(b""))).is_none());
        assert!(token_from_secret(&token_secret("a", "rotator", Some(&[0xff, 0xfe]))).is_none());

        let token = token_from_secret(&token_secret("a", "rotator", Some(b"eyJhbGci")))
            .expect("token should be ready");
        assert_eq!(token.expose(), "eyJhbGci");
    }

    #[test]
    fn listed_secret_keeps_name_and_timestamp() {
        let mut secret = token_secret("rotator-token-a", "rotator", None);
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        secret.metadata.creation_timestamp = Some(Time(ts));

        let listed = to_token_secret(&secret, &sa()).expect("named secret converts");
        assert_eq!(listed.name, "rotator-token-a");
        assert_eq!(listed.created_at, Some(ts));
        assert!(listed.token.is_empty());
    }

    #[test]
    fn secrets_sort_oldest_first() {
        let mut secrets = vec![
            listed("rotator-token-c", Some(300)),
            listed("rotator-token-b", Some(100)),
            listed("rotator-token-a", Some(100)),
            listed("rotator-token-z", None),
        ];
        sort_by_creation(&mut secrets);

        let names: Vec<_> = secrets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "rotator-token-z",
                "rotator-token-a",
                "rotator-token-b",
                "rotator-token-c"
            ]
        );
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = SecretToken::new("super-secret");
        assert_eq!(format!("{token:?}"), "SecretToken(<redacted>)");
        assert_eq!(format!("{:?}", SecretToken::default()), "SecretToken(<empty>)");
    }

    #[test]
    fn service_account_ref_displays_as_path() {
        assert_eq!(sa().to_string(), "ops/rotator");
    }
}
