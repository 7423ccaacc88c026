//! Builds the query pipeline from workspace configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use enclave_core::{config::AppConfig, AppError, AppResult};
use enclave_llm::{create_client, ClientOptions};
use enclave_prompt::PromptLibrary;
use enclave_router::corpus::load_corpus;
use enclave_router::embeddings::create_provider;
use enclave_router::rerank::HttpReranker;
use enclave_router::{
    Collaborators, DirectoryIdentityStore, LexicalIndex, MemoryHistoryStore, MemoryLexicalIndex,
    MemoryVectorIndex, Pipeline, Reranker, RouterConfig,
};

/// A ready pipeline plus the pieces commands inspect directly.
pub struct Runtime {
    pub pipeline: Pipeline,
    pub history: Arc<MemoryHistoryStore>,
}

impl Runtime {
    pub async fn build(config: &AppConfig) -> AppResult<Self> {
        config.validate()?;
        let router = RouterConfig::from_app_config(config)?;
        let enclave_dir = config.enclave_dir();

        let identity = Arc::new(load_directory(config, &router)?);

        let embedder = create_provider(&router.embedding)?;
        let corpus_root = router.sources.corpus_path(&enclave_dir);
        let chunks = if corpus_root.is_dir() {
            load_corpus(
                &corpus_root,
                router.sources.chunk_size,
                router.sources.chunk_overlap,
            )?
        } else {
            tracing::warn!(path = ?corpus_root, "no corpus directory, every answer will be ungrounded");
            Vec::new()
        };
        tracing::info!(
            chunks = chunks.len(),
            embedder = embedder.provider_name(),
            "indexing corpus"
        );

        let lexical = router
            .retrieval
            .lexical_enabled
            .then(|| Arc::new(MemoryLexicalIndex::new(chunks.clone())) as Arc<dyn LexicalIndex>);
        let vector = Arc::new(MemoryVectorIndex::build(chunks, embedder.as_ref()).await?);

        let reranker = if router.retrieval.rerank_enabled {
            let reranker = HttpReranker::new(&router.rerank, router.timeouts.rerank())?;
            Some(Arc::new(reranker) as Arc<dyn Reranker>)
        } else {
            None
        };

        let options = ClientOptions {
            endpoint: config.provider_endpoint(&config.provider),
            api_key: config.resolve_api_key(&config.provider),
            timeout: config
                .get_provider_config(&config.provider)
                .and_then(|p| p.timeout())
                .map(Duration::from_secs),
        };
        let llm = create_client(&config.provider, &options).map_err(AppError::Config)?;
        let prompts = Arc::new(PromptLibrary::load(&config.workspace)?);
        let history = Arc::new(MemoryHistoryStore::new(router.history.max_messages));

        let services = Collaborators {
            identity,
            llm,
            prompts,
            embedder,
            vector,
            lexical,
            reranker,
            history: history.clone(),
        };
        let pipeline = Pipeline::new(services, &router, &config.model);

        Ok(Self {
            pipeline,
            history,
        })
    }
}

/// The identity directory named in the router config.
pub fn load_directory(config: &AppConfig, router: &RouterConfig) -> AppResult<DirectoryIdentityStore> {
    let path = router.sources.directory_path(&config.enclave_dir());
    ensure_exists(&path)?;
    DirectoryIdentityStore::load(&path)
}

fn ensure_exists(path: &Path) -> AppResult<()> {
    if path.exists() {
        return Ok(());
    }
    Err(AppError::Config(format!(
        "Identity directory not found: {:?}. Create it or set router.sources.directory",
        path
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const DIRECTORY: &str = "departments: [hr, it]\nidentities:\n  - id: alice\n    department: hr\n";

    fn workspace() -> (tempfile::TempDir, AppConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            workspace: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        (dir, config)
    }

    #[tokio::test]
    async fn test_missing_directory_is_a_config_error() {
        let (_dir, config) = workspace();
        let err = Runtime::build(&config).await.err().unwrap();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("Identity directory")));
    }

    #[tokio::test]
    async fn test_builds_from_workspace_files() {
        let (dir, config) = workspace();
        let enclave = dir.path().join(".enclave");
        fs::create_dir_all(enclave.join("corpus/hr")).unwrap();
        fs::write(enclave.join("directory.yaml"), DIRECTORY).unwrap();
        fs::write(
            enclave.join("corpus/hr/leave.md"),
            "# Leave policy\n\nEmployees get 25 days of annual leave.\n",
        )
        .unwrap();

        let runtime = Runtime::build(&config).await.unwrap();
        assert_eq!(runtime.history.session_count(), 0);

        let router = RouterConfig::from_app_config(&config).unwrap();
        let store = load_directory(&config, &router).unwrap();
        assert_eq!(store.len(), 1);
    }
}
