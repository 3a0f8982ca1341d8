pub mod text_block;

use std::fs;
use std::path::{Path, PathBuf};

use cadflow_core::document::Document;
use thiserror::Error;
use tracing::{debug, info};

pub use text_block::{FormatError, dump, parse};

/// 写入文件根节点的版本号属性名。读取时不做校验。
pub const VERSION_ATTRIBUTE: &str = "version";
pub const DEFAULT_FORMAT_VERSION: &str = "1";

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed document file {path:?}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<Document, IoError>;
}

pub trait DocumentSaver {
    fn save(&self, document: &Document, path: &Path) -> Result<(), IoError>;
}

/// 原生文本格式的读写入口。
pub struct NativeFacade {
    format_version: String,
}

impl Default for NativeFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeFacade {
    pub fn new() -> Self {
        Self::with_version(DEFAULT_FORMAT_VERSION)
    }

    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            format_version: version.into(),
        }
    }

    pub fn format_version(&self) -> &str {
        &self.format_version
    }

    /// 把文档序列化为文件内容，根节点带版本号。
    pub fn to_text(&self, document: &Document) -> String {
        let mut root = document.save();
        root.set_attribute(VERSION_ATTRIBUTE, &self.format_version);
        dump(&root)
    }

    /// 从文件内容构建新文档；任何一个实体失败都不会产生部分载入的文档。
    pub fn from_text(&self, source: &str) -> Result<Document, IoError> {
        let root = parse(source).map_err(|source| IoError::Format {
            path: PathBuf::new(),
            source,
        })?;
        Document::from_block(&root).map_err(|err| IoError::InvalidDocument(err.to_string()))
    }
}

impl DocumentLoader for NativeFacade {
    fn load(&self, path: &Path) -> Result<Document, IoError> {
        let data = fs::read_to_string(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let root = parse(&data).map_err(|source| IoError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(version) = root.attribute(VERSION_ATTRIBUTE) {
            debug!(path = %path.display(), version, "文档文件版本");
        }
        let document =
            Document::from_block(&root).map_err(|err| IoError::InvalidDocument(err.to_string()))?;
        info!(path = %path.display(), entities = document.len(), "文档已读取");
        Ok(document)
    }
}

impl DocumentSaver for NativeFacade {
    fn save(&self, document: &Document, path: &Path) -> Result<(), IoError> {
        let text = self.to_text(document);
        fs::write(path, text).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), entities = document.len(), "文档已保存");
        Ok(())
    }
}
