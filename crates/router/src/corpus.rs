//! Local document corpus: `<root>/<scope>/**/*.{md,txt}`.
//!
//! The first directory level under the root names the scope, so
//! `corpus/hr/leave/annual.md` belongs to `hr`.

use std::path::{Path, PathBuf};

use enclave_core::{AppError, AppResult};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::chunker::chunk_text;

const EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// One searchable chunk of a corpus file.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusChunk {
    pub document_id: String,
    pub title: String,
    pub scope: String,
    pub content: String,
}

/// Read and chunk every document under `root`.
///
/// Unreadable or non UTF-8 files are skipped with a warning. Files placed
/// directly in `root` have no scope and are skipped too.
pub fn load_corpus(root: &Path, chunk_size: usize, overlap: usize) -> AppResult<Vec<CorpusChunk>> {
    if !root.is_dir() {
        return Err(AppError::Config(format!(
            "Corpus directory not found: {:?}",
            root
        )));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_document(p))
        .collect();
    files.sort();

    let mut chunks = Vec::new();
    for path in files {
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let Some(scope) = scope_of(relative) else {
            tracing::warn!(path = ?path, "document outside any scope directory, skipped");
            continue;
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "skipping unreadable document");
                continue;
            }
        };

        let title = title_of(&path, &text);
        let relative = relative.to_string_lossy().replace('\\', "/");
        for (position, content) in chunk_text(&text, chunk_size, overlap).into_iter().enumerate() {
            chunks.push(CorpusChunk {
                document_id: document_id(&relative, position),
                title: title.clone(),
                scope: scope.clone(),
                content,
            });
        }
    }

    tracing::info!(root = ?root, chunks = chunks.len(), "corpus loaded");
    Ok(chunks)
}

fn is_document(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'));
    let known = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
    !hidden && known
}

fn scope_of(relative: &Path) -> Option<String> {
    let mut components = relative.components();
    let first = components.next()?;
    components.next()?;
    Some(first.as_os_str().to_string_lossy().into_owned())
}

/// First markdown heading, else the file stem.
fn title_of(path: &Path, text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|heading| heading.trim().to_string())
        .filter(|heading| !heading.is_empty())
        .or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "untitled".to_string())
}

/// Stable id from the file's path inside the corpus and the chunk position.
pub fn document_id(relative_path: &str, position: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(relative_path.as_bytes());
    hasher.update(b"#");
    hasher.update(position.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
