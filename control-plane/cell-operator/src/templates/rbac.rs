use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};

use super::{TemplateError, cell_namespace, owned_meta};
use crate::crd::Cell;

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(strings(groups)),
        resources: Some(strings(resources)),
        verbs: strings(verbs),
        ..Default::default()
    }
}

pub fn non_resource_rule(urls: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        non_resource_urls: Some(strings(urls)),
        verbs: strings(verbs),
        ..Default::default()
    }
}

/// Rules kube-rbac-proxy sidecars need to authorize scrapes.
pub fn auth_delegation_rules() -> Vec<PolicyRule> {
    vec![
        rule(&["authentication.k8s.io"], &["tokenreviews"], &["create"]),
        rule(&["authorization.k8s.io"], &["subjectaccessreviews"], &["create"]),
    ]
}

pub fn service_account(
    cell: &Cell,
    name: &str,
    labels: BTreeMap<String, String>,
) -> Result<ServiceAccount, TemplateError> {
    Ok(ServiceAccount {
        metadata: owned_meta(cell, name, Some(cell_namespace(cell)?), labels)?,
        ..Default::default()
    })
}

pub fn cluster_role(
    cell: &Cell,
    name: &str,
    labels: BTreeMap<String, String>,
    rules: Vec<PolicyRule>,
) -> Result<ClusterRole, TemplateError> {
    Ok(ClusterRole {
        metadata: owned_meta(cell, name, None, labels)?,
        rules: Some(rules),
        ..Default::default()
    })
}

fn service_account_subject(cell: &Cell, name: &str) -> Result<Subject, TemplateError> {
    Ok(Subject {
        kind: "ServiceAccount".into(),
        name: name.into(),
        namespace: Some(cell_namespace(cell)?),
        ..Default::default()
    })
}

/// Binds the cluster role `name` to the service account of the same name.
pub fn cluster_role_binding(
    cell: &Cell,
    name: &str,
    labels: BTreeMap<String, String>,
) -> Result<ClusterRoleBinding, TemplateError> {
    Ok(ClusterRoleBinding {
        metadata: owned_meta(cell, name, None, labels)?,
        role_ref: RoleRef {
            api_group: RBAC_GROUP.into(),
            kind: "ClusterRole".into(),
            name: name.into(),
        },
        subjects: Some(vec![service_account_subject(cell, name)?]),
    })
}

pub fn role(
    cell: &Cell,
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    rules: Vec<PolicyRule>,
) -> Result<Role, TemplateError> {
    Ok(Role {
        metadata: owned_meta(cell, name, Some(namespace.into()), labels)?,
        rules: Some(rules),
    })
}

/// Binds role `role_name` in `namespace` to service account `subject`
/// living in the cell namespace.
pub fn role_binding(
    cell: &Cell,
    name: &str,
    namespace: &str,
    role_name: &str,
    subject: &str,
    labels: BTreeMap<String, String>,
) -> Result<RoleBinding, TemplateError> {
    Ok(RoleBinding {
        metadata: owned_meta(cell, name, Some(namespace.into()), labels)?,
        role_ref: RoleRef {
            api_group: RBAC_GROUP.into(),
            kind: "Role".into(),
            name: role_name.into(),
        },
        subjects: Some(vec![service_account_subject(cell, subject)?]),
    })
}
