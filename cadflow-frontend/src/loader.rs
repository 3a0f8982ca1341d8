use std::env;
use std::path::{Path, PathBuf};

use cadflow_config::StorageConfig;
use cadflow_core::document::Document;
use cadflow_io::{DocumentLoader, NativeFacade};
use tracing::{info, warn};

/// 指定启动文档的环境变量。
pub const DOCUMENT_ENV: &str = "CADFLOW_DOCUMENT";

/// 文档来源，便于前端呈现加载信息。
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentSource {
    File(PathBuf),
    Empty,
}

#[derive(Debug)]
pub struct LoadedDocument {
    pub document: Document,
    pub source: DocumentSource,
}

impl LoadedDocument {
    pub fn empty() -> Self {
        Self {
            document: Document::new(),
            source: DocumentSource::Empty,
        }
    }
}

/// 依次尝试显式路径与环境变量 `CADFLOW_DOCUMENT`，失败时回退到空文档。
pub fn load_document(explicit: Option<&Path>, storage: &StorageConfig) -> LoadedDocument {
    let candidate = explicit
        .map(Path::to_path_buf)
        .or_else(|| env::var_os(DOCUMENT_ENV).map(PathBuf::from));
    let Some(path) = candidate else {
        return LoadedDocument::empty();
    };

    let path = storage.resolve(path);
    match NativeFacade::with_version(storage.format_version.clone()).load(&path) {
        Ok(document) => {
            info!(path = %path.display(), entities = document.len(), "文档加载成功");
            LoadedDocument {
                document,
                source: DocumentSource::File(path),
            }
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "加载文档失败，回退到空文档");
            LoadedDocument::empty()
        }
    }
}
