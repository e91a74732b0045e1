//! Harness secret manager client
//!
//! Publishes the rotated token as a Harness `SecretText` secret. Harness has no
//! single upsert call, so [`HarnessClient`] updates in place with `PUT` and
//! falls back to `POST` when the secret does not exist yet.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster::{SecretToken, ServiceAccountRef};
use crate::Error;

/// Default Harness host
pub const DEFAULT_HARNESS_URL: &str = "app.harness.io";
/// Default secret manager holding the inline value
pub const DEFAULT_SECRET_MANAGER: &str = "harnessSecretManager";
/// Default description written on the secret
pub const DEFAULT_DESCRIPTION: &str = "created by automation";

const SECRETS_PATH: &str = "/gateway/ng/api/v2/secrets";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Message Harness returns when updating a secret that does not exist
const SECRET_NOT_FOUND_MESSAGE: &str = "No such secret found";

/// Account/org/project coordinate of a Harness secret
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    /// Harness account identifier
    pub account: String,
    /// Organization identifier, unset for account scope
    pub org: Option<String>,
    /// Project identifier, requires `org`
    pub project: Option<String>,
}

impl Scope {
    /// Build a scope, treating empty strings as unset.
    ///
    /// A project without an org is rejected: Harness projects only exist
    /// inside an organization.
    pub fn new(
        account: impl Into<String>,
        org: Option<String>,
        project: Option<String>,
    ) -> Result<Self, Error> {
        let account = account.into();
        let org = org.filter(|o| !o.trim().is_empty());
        let project = project.filter(|p| !p.trim().is_empty());

        if account.trim().is_empty() {
            return Err(Error::validation("harness account must not be empty"));
        }
        if project.is_some() && org.is_none() {
            return Err(Error::validation(
                "harness project requires harness org to be set",
            ));
        }
        Ok(Self {
            account,
            org,
            project,
        })
    }

    /// Labels recording this scope on minted cluster secrets.
    ///
    /// Harness identifiers may hold characters (and lengths) Kubernetes label
    /// values reject, so each value goes through [`label_value`]. A part with
    /// nothing usable left is not labeled.
    pub fn labels(&self) -> BTreeMap<String, String> {
        [
            ("harness_account", Some(&self.account)),
            ("harness_org", self.org.as_ref()),
            ("harness_project", self.project.as_ref()),
        ]
        .into_iter()
        .filter_map(|(key, raw)| Some((key.to_string(), label_value(raw?)?)))
        .collect()
    }

    fn query(&self) -> Vec<(&'static str, &str)> {
        let mut query = vec![
            ("private_secret", "false"),
            ("routingId", self.account.as_str()),
            ("accountIdentifier", self.account.as_str()),
        ];
        if let Some(org) = &self.org {
            query.push(("orgIdentifier", org.as_str()));
        }
        if let Some(project) = &self.project {
            query.push(("projectIdentifier", project.as_str()));
        }
        query
    }
}

/// Longest value Kubernetes accepts for a label
const MAX_LABEL_VALUE_LEN: usize = 63;

/// Coerce `raw` into a valid Kubernetes label value.
///
/// Characters outside `[A-Za-z0-9._-]` become `-`, the result is cut to 63
/// characters and must start and end alphanumeric. `None` if nothing is left.
pub fn label_value(raw: &str) -> Option<String> {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_VALUE_LEN)
        .collect();
    let trimmed = mapped.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Deterministic destination identifier for a service account
pub fn secret_identifier(sa: &ServiceAccountRef) -> String {
    format!("{}-{}", sa.namespace, sa.name)
}

/// Trait abstracting the external secret store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Create the secret or fully replace its value and tags.
    ///
    /// Fails with [`Error::Auth`] when the credentials cannot write and
    /// [`Error::NotFound`] when the org/project scope does not exist.
    async fn upsert(
        &self,
        scope: &Scope,
        identifier: &str,
        value: &SecretToken,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), Error>;
}

/// Connection settings for [`HarnessClient`]
#[derive(Clone)]
pub struct HarnessClientConfig {
    /// Harness host (`app.harness.io`) or full base URL
    pub url: String,
    /// Platform API key (`x-api-key`)
    pub api_key: String,
    /// Description written on the secret
    pub description: String,
    /// Secret manager identifier holding the value
    pub secret_manager: String,
}

impl std::fmt::Debug for HarnessClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessClientConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("description", &self.description)
            .field("secret_manager", &self.secret_manager)
            .finish()
    }
}

/// [`DestinationStore`] backed by the Harness NG secrets API
pub struct HarnessClient {
    http: reqwest::Client,
    base_url: String,
    config: HarnessClientConfig,
}

impl HarnessClient {
    /// Create a client with the default request timeout
    pub fn new(config: HarnessClientConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url(&config.url),
            config,
        })
    }

    fn authorized(&self, request: RequestBuilder, scope: &Scope) -> RequestBuilder {
        request
            .header("Harness-Account", &scope.account)
            .header("x-api-key", &self.config.api_key)
            .query(&scope.query())
    }

    async fn update(&self, scope: &Scope, body: &SecretRequest<'_>) -> Result<Response, Error> {
        let url = format!("{}{}/{}", self.base_url, SECRETS_PATH, body.secret.identifier);
        debug!(url = %url, "PUT harness secret");
        Ok(self
            .authorized(self.http.put(&url), scope)
            .json(body)
            .send()
            .await?)
    }

    async fn create(&self, scope: &Scope, body: &SecretRequest<'_>) -> Result<Response, Error> {
        let url = format!("{}{}", self.base_url, SECRETS_PATH);
        debug!(url = %url, "POST harness secret");
        Ok(self
            .authorized(self.http.post(&url), scope)
            .json(body)
            .send()
            .await?)
    }
}

#[async_trait]
impl DestinationStore for HarnessClient {
    async fn upsert(
        &self,
        scope: &Scope,
        identifier: &str,
        value: &SecretToken,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let body = SecretRequest::new(
            scope,
            identifier,
            value,
            tags,
            &self.config.description,
            &self.config.secret_manager,
        );

        match check(self.update(scope, &body).await?).await {
            Ok(()) => {
                info!(identifier = %identifier, "Updated harness secret");
                return Ok(());
            }
            Err(failure) if failure.is_missing_secret() => {
                debug!(identifier = %identifier, "Harness secret absent, creating");
            }
            Err(failure) => return Err(failure.into_error()),
        }

        check(self.create(scope, &body).await?)
            .await
            .map_err(ApiFailure::into_error)?;
        info!(identifier = %identifier, "Created harness secret");
        Ok(())
    }
}

fn base_url(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if url.contains("://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

#[derive(Debug, Serialize)]
struct SecretRequest<'a> {
    secret: SecretBody<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecretBody<'a> {
    name: &'a str,
    identifier: &'a str,
    tags: &'a BTreeMap<String, String>,
    description: &'a str,
    #[serde(rename = "type")]
    type_: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    org_identifier: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_identifier: Option<&'a str>,
    spec: SecretTextSpec<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecretTextSpec<'a> {
    secret_manager_identifier: &'a str,
    value_type: &'static str,
    value: &'a str,
}

impl<'a> SecretRequest<'a> {
    fn new(
        scope: &'a Scope,
        identifier: &'a str,
        value: &'a SecretToken,
        tags: &'a BTreeMap<String, String>,
        description: &'a str,
        secret_manager: &'a str,
    ) -> Self {
        Self {
            secret: SecretBody {
                name: identifier,
                identifier,
                tags,
                description,
                type_: "SecretText",
                org_identifier: scope.org.as_deref(),
                project_identifier: scope.project.as_deref(),
                spec: SecretTextSpec {
                    secret_manager_identifier: secret_manager,
                    value_type: "Inline",
                    value: value.expose(),
                },
            },
        }
    }
}

/// Error body returned by Harness NG APIs
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// A non-success response, read fully so it can be classified
#[derive(Debug)]
struct ApiFailure {
    status: StatusCode,
    body: ApiErrorBody,
    text: String,
}

async fn check(response: Response) -> Result<(), ApiFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str(&text).unwrap_or_default();
    Err(ApiFailure { status, body, text })
}

impl ApiFailure {
    fn message(&self) -> String {
        self.body
            .message
            .clone()
            .unwrap_or_else(|| self.text.clone())
    }

    fn is_missing_secret(&self) -> bool {
        self.message().contains(SECRET_NOT_FOUND_MESSAGE)
    }

    fn is_missing_scope(&self) -> bool {
        if self.status == StatusCode::NOT_FOUND {
            return true;
        }
        if matches!(
            self.body.code.as_deref(),
            Some("RESOURCE_NOT_FOUND") | Some("ENTITY_NOT_FOUND")
        ) {
            return true;
        }
        let message = self.message().to_lowercase();
        (message.contains("organization") || message.contains("project"))
            && (message.contains("not found") || message.contains("does not exist"))
    }

    fn into_error(self) -> Error {
        let status = self.status.as_u16();
        if matches!(self.status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Error::Auth {
                status,
                message: self.message(),
            };
        }
        if self.is_missing_scope() {
            return Error::NotFound {
                status,
                message: self.message(),
            };
        }
        Error::HarnessApi {
            status,
            message: self.message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_scope() -> Scope {
        Scope::new("acct", Some("platform".into()), Some("delegates".into())).unwrap()
    }

    fn failure(status: u16, json: &str) -> ApiFailure {
        ApiFailure {
            status: StatusCode::from_u16(status).unwrap(),
            body: serde_json::from_str(json).unwrap_or_default(),
            text: json.to_string(),
        }
    }

    #[test]
    fn identifier_is_namespace_and_name() {
        let sa = ServiceAccountRef::new("ops", "rotator");
        assert_eq!(secret_identifier(&sa), "ops-rotator");
        assert_eq!(secret_identifier(&sa.clone()), secret_identifier(&sa));
    }

    #[test]
    fn project_without_org_is_rejected() {
        let err = Scope::new("acct", None, Some("delegates".into())).unwrap_err();
        assert!(err.to_string().contains("requires harness org"));
    }

    #[test]
    fn empty_scope_parts_are_unset() {
        let scope = Scope::new("acct", Some(String::new()), Some("  ".into())).unwrap();
        assert_eq!(scope.org, None);
        assert_eq!(scope.project, None);
        assert!(Scope::new(" ", None, None).is_err());
    }

    #[test]
    fn org_only_scope_is_allowed() {
        let scope = Scope::new("acct", Some("platform".into()), None).unwrap();
        assert_eq!(scope.org.as_deref(), Some("platform"));
        assert_eq!(scope.project, None);
    }

    #[test]
    fn scope_labels_follow_scope() {
        let labels = Scope::new("acct", None, None).unwrap().labels();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels["harness_account"], "acct");

        let labels = project_scope().labels();
        assert_eq!(labels["harness_org"], "platform");
        assert_eq!(labels["harness_project"], "delegates");
    }

    #[test]
    fn label_values_are_made_valid_for_kubernetes() {
        assert_eq!(label_value("platform_team").as_deref(), Some("platform_team"));
        assert_eq!(label_value("my$org").as_deref(), Some("my-org"));
        assert_eq!(label_value("_$delegates$").as_deref(), Some("delegates"));
        assert_eq!(label_value("$$"), None);

        let long = "a".repeat(128);
        assert_eq!(label_value(&long).map(|v| v.len()), Some(63));

        let cut_at_separator = format!("{}_tail", "b".repeat(62));
        assert_eq!(label_value(&cut_at_separator), Some("b".repeat(62)));
    }

    #[test]
    fn unusable_scope_parts_are_not_labeled() {
        let scope = Scope::new("acct", Some("$$".into()), Some("ops$team".into())).unwrap();
        let labels = scope.labels();
        assert!(!labels.contains_key("harness_org"));
        assert_eq!(labels["harness_project"], "ops-team");
        assert_eq!(labels["harness_account"], "acct");
    }

    #[test]
    fn query_includes_only_set_scope_parts() {
        let account = Scope::new("acct", None, None).unwrap();
        let keys: Vec<_> = account.query().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["private_secret", "routingId", "accountIdentifier"]);

        let scope = project_scope();
        let query = scope.query();
        assert!(query.contains(&("orgIdentifier", "platform")));
        assert!(query.contains(&("projectIdentifier", "delegates")));
    }

    #[test]
    fn request_body_is_inline_secret_text() {
        let scope = project_scope();
        let token = SecretToken::new("eyJhbGci");
        let tags = BTreeMap::from([("team".to_string(), "sre".to_string())]);
        let body = SecretRequest::new(
            &scope,
            "ops-rotator",
            &token,
            &tags,
            DEFAULT_DESCRIPTION,
            DEFAULT_SECRET_MANAGER,
        );

        let json = serde_json::to_value(&body).unwrap();
        let secret = &json["secret"];
        assert_eq!(secret["name"], "ops-rotator");
        assert_eq!(secret["identifier"], "ops-rotator");
        assert_eq!(secret["type"], "SecretText");
        assert_eq!(secret["orgIdentifier"], "platform");
        assert_eq!(secret["projectIdentifier"], "delegates");
        assert_eq!(secret["tags"]["team"], "sre");
        assert_eq!(secret["description"], "created by automation");
        assert_eq!(secret["spec"]["valueType"], "Inline");
        assert_eq!(secret["spec"]["value"], "eyJhbGci");
        assert_eq!(
            secret["spec"]["secretManagerIdentifier"],
            "harnessSecretManager"
        );
    }

    #[test]
    fn account_scope_body_omits_org_and_project() {
        let scope = Scope::new("acct", None, None).unwrap();
        let token = SecretToken::new("t");
        let tags = BTreeMap::new();
        let body = SecretRequest::new(&scope, "ops-rotator", &token, &tags, "", "");

        let json = serde_json::to_value(&body).unwrap();
        assert!(json["secret"].get("orgIdentifier").is_none());
        assert!(json["secret"].get("projectIdentifier").is_none());
    }

    #[test]
    fn base_url_defaults_to_https() {
        assert_eq!(base_url("app.harness.io"), "https://app.harness.io");
        assert_eq!(base_url("http://127.0.0.1:8080/"), "http://127.0.0.1:8080");
    }

    #[test]
    fn missing_secret_is_detected_from_message() {
        let f = failure(
            400,
            r#"{"status":"ERROR","code":"RESOURCE_NOT_FOUND","message":"No such secret found [ops-rotator]"}"#,
        );
        assert!(f.is_missing_secret());
    }

    #[test]
    fn auth_statuses_map_to_auth_error() {
        for status in [401, 403] {
            match failure(status, r#"{"message":"Invalid API key"}"#).into_error() {
                Error::Auth { status: s, message } => {
                    assert_eq!(s, status);
                    assert_eq!(message, "Invalid API key");
                }
                other => panic!("expected Auth, got {other:?}"),
            }
        }
    }

    #[test]
    fn missing_scope_maps_to_not_found() {
        let cases = [
            failure(404, "not found"),
            failure(400, r#"{"code":"ENTITY_NOT_FOUND","message":"x"}"#),
            failure(
                400,
                r#"{"code":"INVALID_REQUEST","message":"Project with identifier [p] does not exist"}"#,
            ),
        ];
        for f in cases {
            assert!(matches!(f.into_error(), Error::NotFound { .. }));
        }
    }

    #[test]
    fn other_failures_keep_status_and_raw_text() {
        match failure(500, "upstream exploded").into_error() {
            Error::HarnessApi { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("expected HarnessApi, got {other:?}"),
        }
    }

    #[test]
    fn client_config_debug_hides_api_key() {
        let config = HarnessClientConfig {
            url: DEFAULT_HARNESS_URL.to_string(),
            api_key: "pat.secret".to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            secret_manager: DEFAULT_SECRET_MANAGER.to_string(),
        };
        assert!(!format!("{config:?}").contains("pat.secret"));
    }
}
