//! Access resolution: identity -> readable scopes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use enclave_core::AppError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stage::StageError;
use crate::types::{AccessContext, Role, PUBLIC_SCOPE};

/// A user as the identity store knows them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub department: String,
    #[serde(default)]
    pub role: Role,
    /// Read every department regardless of role
    #[serde(default)]
    pub view_all: bool,
    /// Scopes granted individually on top of the department rules
    #[serde(default)]
    pub extra_scopes: Vec<String>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity not found: {0}")]
    NotFound(String),
    /// The store cannot be contacted at all; requests must not proceed
    #[error("identity store unreachable: {0}")]
    Unreachable(String),
    #[error("identity store error: {0}")]
    Backend(String),
}

/// Source of identity records and the department list.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn resolve(&self, identity: &str) -> Result<IdentityRecord, IdentityError>;

    /// Every department that owns documents, excluding the public scope.
    async fn departments(&self) -> Result<Vec<String>, IdentityError>;
}

pub struct AccessResolver {
    store: Arc<dyn IdentityStore>,
    timeout: Duration,
}

impl AccessResolver {
    pub fn new(store: Arc<dyn IdentityStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Resolve the caller's access context.
    ///
    /// `None` yields the anonymous context; whether that is allowed at all is
    /// decided before the pipeline starts. Lookup misses, timeouts and
    /// backend errors are recoverable (anonymous fallback); an unreachable
    /// store is fatal.
    pub async fn resolve(&self, identity: Option<&str>) -> Result<AccessContext, StageError> {
        let Some(identity) = identity else {
            return Ok(AccessContext::anonymous());
        };

        let record = match tokio::time::timeout(self.timeout, self.store.resolve(identity)).await {
            Err(_) => {
                return Err(StageError::Recoverable(AppError::timeout(
                    "identity lookup",
                    self.timeout,
                )))
            }
            Ok(Err(IdentityError::Unreachable(msg))) => {
                return Err(StageError::Fatal(AppError::Identity(msg)))
            }
            Ok(Err(e)) => return Err(StageError::Recoverable(AppError::Identity(e.to_string()))),
            Ok(Ok(record)) => record,
        };

        let departments = if grants_all(&record) {
            self.known_departments().await
        } else {
            Vec::new()
        };

        let context = build_context(&record, &departments);
        tracing::debug!(
            identity = %context.identity_id,
            role = %context.role,
            scopes = ?context.permitted_scopes,
            "access resolved"
        );
        Ok(context)
    }

    /// Department list, or empty when the store cannot provide it in time.
    pub async fn known_departments(&self) -> Vec<String> {
        match tokio::time::timeout(self.timeout, self.store.departments()).await {
            Ok(Ok(departments)) => departments
                .into_iter()
                .filter(|d| !d.is_empty() && d != PUBLIC_SCOPE)
                .collect(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "department list unavailable");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "department list timed out");
                Vec::new()
            }
        }
    }
}

fn grants_all(record: &IdentityRecord) -> bool {
    record.view_all || record.role == Role::SuperAdmin
}

/// Apply the scope rules to a record.
///
/// Order: public, own department, every known department (view-all only),
/// explicit grants. Duplicates and blanks are dropped.
pub fn build_context(record: &IdentityRecord, departments: &[String]) -> AccessContext {
    let mut scopes: Vec<String> = vec![PUBLIC_SCOPE.to_string()];
    let mut add = |scope: &str| {
        let scope = scope.trim();
        if !scope.is_empty() && !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
    };

    add(&record.department);
    if grants_all(record) {
        departments.iter().for_each(|d| add(d));
    }
    record.extra_scopes.iter().for_each(|s| add(s));

    AccessContext {
        identity_id: record.id.clone(),
        display_name: record
            .display_name
            .clone()
            .unwrap_or_else(|| record.id.clone()),
        department: record.department.clone(),
        role: record.role,
        permitted_scopes: scopes,
        can_upload: record.role != Role::Member,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(id: &str, department: &str, role: Role) -> IdentityRecord {
        IdentityRecord {
            id: id.to_string(),
            display_name: None,
            department: department.to_string(),
            role,
            view_all: false,
            extra_scopes: Vec::new(),
        }
    }

    enum Behaviour {
        Records(HashMap<String, IdentityRecord>),
        Unreachable,
        Slow,
    }

    struct StubStore(Behaviour);

    #[async_trait]
    impl IdentityStore for StubStore {
        async fn resolve(&self, identity: &str) -> Result<IdentityRecord, IdentityError> {
            match &self.0 {
                Behaviour::Records(map) => map
                    .get(identity)
                    .cloned()
                    .ok_or_else(|| IdentityError::NotFound(identity.to_string())),
                Behaviour::Unreachable => Err(IdentityError::Unreachable("connection refused".into())),
                Behaviour::Slow => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Err(IdentityError::Backend("late".into()))
                }
            }
        }

        async fn departments(&self) -> Result<Vec<String>, IdentityError> {
            Ok(vec!["finance".into(), "hr".into(), "it".into(), "public".into()])
        }
    }

    fn resolver(behaviour: Behaviour) -> AccessResolver {
        AccessResolver::new(Arc::new(StubStore(behaviour)), Duration::from_millis(50))
    }

    #[test]
    fn test_member_gets_public_and_own_department() {
        let ctx = build_context(&record("bob", "hr", Role::Member), &[]);
        assert_eq!(ctx.permitted_scopes, vec!["public", "hr"]);
        assert!(!ctx.can_upload);
    }

    #[test]
    fn test_public_department_not_duplicated() {
        let ctx = build_context(&record("guest", "public", Role::Member), &[]);
        assert_eq!(ctx.permitted_scopes, vec!["public"]);
    }

    #[test]
    fn test_super_admin_sees_all_departments() {
        let departments = vec!["finance".to_string(), "hr".to_string(), "it".to_string()];
        let ctx = build_context(&record("root", "it", Role::SuperAdmin), &departments);
        assert_eq!(ctx.permitted_scopes, vec!["public", "it", "finance", "hr"]);
        assert!(ctx.can_upload);
    }

    #[test]
    fn test_department_admin_is_not_view_all() {
        let departments = vec!["finance".to_string(), "hr".to_string()];
        let ctx = build_context(&record("ann", "hr", Role::DepartmentAdmin), &departments);
        assert_eq!(ctx.permitted_scopes, vec!["public", "hr"]);
        assert!(ctx.can_upload_to("hr"));
    }

    #[test]
    fn test_extra_grants_appended_once() {
        let mut r = record("eve", "hr", Role::Member);
        r.extra_scopes = vec!["finance".into(), "hr".into(), " ".into(), "finance".into()];
        let ctx = build_context(&r, &[]);
        assert_eq!(ctx.permitted_scopes, vec!["public", "hr", "finance"]);
    }

    #[tokio::test]
    async fn test_resolve_known_identity() {
        let mut map = HashMap::new();
        map.insert("root".to_string(), record("root", "it", Role::SuperAdmin));
        let ctx = resolver(Behaviour::Records(map))
            .resolve(Some("root"))
            .await
            .unwrap();
        assert_eq!(ctx.permitted_scopes, vec!["public", "it", "finance", "hr"]);
    }

    #[tokio::test]
    async fn test_unknown_identity_is_recoverable() {
        let err = resolver(Behaviour::Records(HashMap::new()))
            .resolve(Some("ghost"))
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_fatal() {
        let err = resolver(Behaviour::Unreachable)
            .resolve(Some("anyone"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_slow_store_times_out_recoverably() {
        let err = resolver(Behaviour::Slow)
            .resolve(Some("anyone"))
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(err.into_inner().is_timeout());
    }

    #[tokio::test]
    async fn test_no_identity_is_anonymous() {
        let ctx = resolver(Behaviour::Unreachable).resolve(None).await.unwrap();
        assert!(ctx.is_anonymous());
    }

    #[tokio::test]
    async fn test_known_departments_excludes_public() {
        let departments = resolver(Behaviour::Unreachable).known_departments().await;
        assert_eq!(departments, vec!["finance", "hr", "it"]);
    }
}
