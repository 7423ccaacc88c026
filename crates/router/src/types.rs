//! Values passed between pipeline stages.

use serde::{Deserialize, Serialize};

/// Scope every identity can read.
pub const PUBLIC_SCOPE: &str = "public";

/// Identity id of the fallback context. Identity stores must not issue it.
pub const ANONYMOUS_ID: &str = "anonymous";

/// Identity role. Only `SuperAdmin` widens read access; `DepartmentAdmin`
/// matters for uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Member,
    DepartmentAdmin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::DepartmentAdmin => "department_admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller is allowed to read.
///
/// `permitted_scopes` is ordered, duplicate free and always starts with
/// [`PUBLIC_SCOPE`]. Build it through `AccessResolver` or
/// [`AccessContext::anonymous`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessContext {
    pub identity_id: String,
    pub display_name: String,
    pub department: String,
    pub role: Role,
    pub permitted_scopes: Vec<String>,
    pub can_upload: bool,
}

impl AccessContext {
    /// Fallback context: public scope only, no uploads.
    pub fn anonymous() -> Self {
        Self {
            identity_id: ANONYMOUS_ID.to_string(),
            display_name: "Anonymous".to_string(),
            department: PUBLIC_SCOPE.to_string(),
            role: Role::Member,
            permitted_scopes: vec![PUBLIC_SCOPE.to_string()],
            can_upload: false,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.identity_id == ANONYMOUS_ID
    }

    pub fn can_access(&self, scope: &str) -> bool {
        self.permitted_scopes.iter().any(|s| s == scope)
    }

    /// Super admins upload anywhere, department admins into their own
    /// department, everyone else nowhere.
    pub fn can_upload_to(&self, scope: &str) -> bool {
        if !self.can_upload {
            return false;
        }
        match self.role {
            Role::SuperAdmin => true,
            Role::DepartmentAdmin => scope == self.department,
            Role::Member => false,
        }
    }
}

/// Output of intent classification.
///
/// A `None` scope means the question does not belong to any department;
/// confidence is then 0.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub detected_scope: Option<String>,
    pub confidence: f32,
    pub keywords: Vec<String>,
    pub reasoning: String,
}

impl IntentAnalysis {
    /// "Could not tell" default.
    pub fn unknown() -> Self {
        Self {
            detected_scope: None,
            confidence: 0.0,
            keywords: Vec::new(),
            reasoning: String::new(),
        }
    }
}

impl Default for IntentAnalysis {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Where and how hard to search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalStrategy {
    /// Searched first, in order
    pub primary_scopes: Vec<String>,
    /// Searched only if the primary tier comes up short
    pub secondary_scopes: Vec<String>,
    pub max_results: usize,
    pub relevance_threshold: f32,
    pub detected_scope: Option<String>,
    /// False only when a scope was detected and the caller lacks it
    pub has_permission: bool,
    /// Human-readable summary of the decision, for logs and `--json` output
    pub reasoning: String,
}

impl RetrievalStrategy {
    /// Primary scopes followed by secondary scopes.
    pub fn all_scopes(&self) -> impl Iterator<Item = &String> {
        self.primary_scopes.iter().chain(self.secondary_scopes.iter())
    }
}

/// A retrieved document chunk. `score` is in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDocument {
    pub document_id: String,
    pub title: String,
    pub scope: String,
    pub content: String,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(role: Role, department: &str) -> AccessContext {
        AccessContext {
            identity_id: "u1".to_string(),
            display_name: "U".to_string(),
            department: department.to_string(),
            role,
            permitted_scopes: vec![PUBLIC_SCOPE.to_string(), department.to_string()],
            can_upload: role != Role::Member,
        }
    }

    #[test]
    fn test_anonymous_context() {
        let anon = AccessContext::anonymous();
        assert!(anon.is_anonymous());
        assert_eq!(anon.permitted_scopes, vec![PUBLIC_SCOPE]);
        assert!(!anon.can_upload_to(PUBLIC_SCOPE));
    }

    #[test]
    fn test_upload_rules() {
        assert!(context(Role::SuperAdmin, "it").can_upload_to("finance"));
        assert!(context(Role::DepartmentAdmin, "hr").can_upload_to("hr"));
        assert!(!context(Role::DepartmentAdmin, "hr").can_upload_to("finance"));
        assert!(!context(Role::Member, "hr").can_upload_to("hr"));
    }

    #[test]
    fn test_role_serde() {
        let role: Role = serde_yaml::from_str("department_admin").unwrap();
        assert_eq!(role, Role::DepartmentAdmin);
        assert_eq!(Role::SuperAdmin.to_string(), "super_admin");
    }
}
