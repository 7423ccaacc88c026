//! Scopes command handler.

use std::sync::Arc;

use clap::Args;
use enclave_core::{config::AppConfig, AppResult};
use enclave_router::stage::StageError;
use enclave_router::{AccessResolver, RouterConfig};

use super::runtime::load_directory;

/// Show which document scopes an identity can read
#[derive(Args, Debug)]
pub struct ScopesCommand {
    /// Identity to resolve
    #[arg(short, long, env = "ENCLAVE_USER")]
    pub user: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ScopesCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let router = RouterConfig::from_app_config(config)?;
        let store = Arc::new(load_directory(config, &router)?);
        let resolver = AccessResolver::new(store, router.timeouts.identity());

        let access = resolver
            .resolve(Some(self.user.as_str()))
            .await
            .map_err(StageError::into_inner)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&access)?);
            return Ok(());
        }

        if access.is_anonymous() {
            println!("{}: unknown identity, anonymous access only", self.user);
        } else {
            println!("{} ({})", access.display_name, access.identity_id);
            println!("Department: {}", access.department);
            println!("Role: {}", access.role);
        }
        println!("Readable scopes: {}", access.permitted_scopes.join(", "));
        let uploads: Vec<&str> = access
            .permitted_scopes
            .iter()
            .filter(|s| access.can_upload_to(s))
            .map(String::as_str)
            .collect();
        if uploads.is_empty() {
            println!("Upload scopes: none");
        } else {
            println!("Upload scopes: {}", uploads.join(", "));
        }
        Ok(())
    }
}
