use std::path::PathBuf;

use cadflow_io::IoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("脚本第 {line} 行无效: {message}")]
    Script { line: usize, message: String },
    #[error("读取脚本 {path:?} 失败: {source}")]
    ReadScript {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] IoError),
    #[error("序列化文档清单失败: {0}")]
    Json(#[from] serde_json::Error),
}
