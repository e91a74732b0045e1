//! RBAC manifests for the identity that runs the rotator
//!
//! Deployment aid only: the rotator never applies these itself. The Role grants
//! exactly the calls a run makes in the target namespace.

use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

use crate::{Error, MANAGED_BY_LABEL, MANAGED_BY_VALUE};

/// Name shared by the generated Role and RoleBinding
pub const RBAC_NAME: &str = "harness-sa-rotator";

fn metadata(namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(RBAC_NAME.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(BTreeMap::from([(
            MANAGED_BY_LABEL.to_string(),
            MANAGED_BY_VALUE.to_string(),
        )])),
        ..Default::default()
    }
}

fn rule(resource: &str, verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![String::new()]),
        resources: Some(vec![resource.to_string()]),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

/// Role allowing a rotation in `namespace`
pub fn build_role(namespace: &str) -> Role {
    Role {
        metadata: metadata(namespace),
        rules: Some(vec![
            rule("serviceaccounts", &["get"]),
            rule("secrets", &["create", "get", "list", "delete"]),
        ]),
    }
}

/// Bind the rotator Role to the service account the pipeline step runs as
pub fn build_role_binding(namespace: &str, runner_namespace: &str, runner: &str) -> RoleBinding {
    RoleBinding {
        metadata: metadata(namespace),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: RBAC_NAME.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: runner.to_string(),
            namespace: Some(runner_namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// Render Role and RoleBinding as a multi-document YAML stream
pub fn render_manifests(
    namespace: &str,
    runner_namespace: &str,
    runner: &str,
) -> Result<String, Error> {
    let role = serde_yaml::to_string(&build_role(namespace))
        .map_err(|e| Error::serialization(format!("failed to serialize Role: {e}")))?;
    let binding = serde_yaml::to_string(&build_role_binding(namespace, runner_namespace, runner))
        .map_err(|e| Error::serialization(format!("failed to serialize RoleBinding: {e}")))?;
    Ok(format!("---\n{role}---\n{binding}"))
}
