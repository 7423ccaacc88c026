//! YAML-backed identity store.
//!
//! ```yaml
//! departments: [finance, hr, it]
//! identities:
//!   - id: alice
//!     display_name: Alice Chen
//!     department: hr
//!     role: department_admin
//!   - id: root
//!     department: it
//!     role: super_admin
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use enclave_core::{AppError, AppResult};
use serde::Deserialize;

use crate::access::{IdentityError, IdentityRecord, IdentityStore};
use crate::types::{ANONYMOUS_ID, PUBLIC_SCOPE};

#[derive(Debug, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    departments: Vec<String>,
    #[serde(default)]
    identities: Vec<IdentityRecord>,
}

/// Identity store held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct DirectoryIdentityStore {
    departments: Vec<String>,
    identities: HashMap<String, IdentityRecord>,
}

impl DirectoryIdentityStore {
    pub fn load(path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read identity directory {:?}: {}", path, e))
        })?;
        Self::from_yaml_str(&contents).map_err(|e| {
            AppError::Config(format!("Invalid identity directory {:?}: {}", path, e))
        })
    }

    pub fn from_yaml_str(yaml: &str) -> AppResult<Self> {
        let file: DirectoryFile = serde_yaml::from_str(yaml)?;
        Self::from_parts(file.departments, file.identities)
    }

    /// Departments named only on identities are added to the department
    /// list. Duplicate identity ids and the reserved anonymous id are
    /// rejected.
    pub fn from_parts(departments: Vec<String>, identities: Vec<IdentityRecord>) -> AppResult<Self> {
        let mut all_departments: Vec<String> = Vec::new();
        let named = departments
            .iter()
            .map(String::as_str)
            .chain(identities.iter().map(|r| r.department.as_str()));
        for department in named {
            let department = department.trim();
            if !department.is_empty()
                && department != PUBLIC_SCOPE
                && !all_departments.iter().any(|d| d == department)
            {
                all_departments.push(department.to_string());
            }
        }

        let mut by_id = HashMap::with_capacity(identities.len());
        for record in identities {
            if record.id.trim().is_empty() {
                return Err(AppError::Config("Identity with empty id".to_string()));
            }
            if record.id.trim() == ANONYMOUS_ID {
                return Err(AppError::Config(format!(
                    "Identity id '{}' is reserved",
                    ANONYMOUS_ID
                )));
            }
            if by_id.contains_key(&record.id) {
                return Err(AppError::Config(format!(
                    "Duplicate identity id: {}",
                    record.id
                )));
            }
            by_id.insert(record.id.clone(), record);
        }

        Ok(Self {
            departments: all_departments,
            identities: by_id,
        })
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[async_trait]
impl IdentityStore for DirectoryIdentityStore {
    async fn resolve(&self, identity: &str) -> Result<IdentityRecord, IdentityError> {
        self.identities
            .get(identity)
            .cloned()
            .ok_or_else(|| IdentityError::NotFound(identity.to_string()))
    }

    async fn departments(&self) -> Result<Vec<String>, IdentityError> {
        Ok(self.departments.clone())
    }
}
