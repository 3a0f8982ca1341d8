pub mod engine;
pub mod input;
pub mod operation;
pub mod operations;
pub mod registry;

pub mod errors {
    use cadflow_core::document::{DocumentError, DocumentId};
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("no active document")]
        NoActiveDocument,
        #[error("operation `{0}` is not registered")]
        UnknownOperation(String),
        #[error("document {0} is not open")]
        UnknownDocument(DocumentId),
        #[error("failed to spawn operation worker: {0}")]
        Spawn(#[source] std::io::Error),
    }

    /// 操作执行体返回的失败。`Cancelled` 属于正常流程，不作为错误记录。
    #[derive(Debug, Error)]
    pub enum OperationFault {
        #[error("operation cancelled")]
        Cancelled,
        #[error("no input queued")]
        NoInput,
        #[error("entity {0} is neither staged nor committed")]
        MissingEntity(u64),
        #[error(transparent)]
        Document(#[from] DocumentError),
        #[error("{0}")]
        Failed(String),
    }
}

pub use engine::{EngineSettings, OperationEngine, OperationHandle, OperationOutcome};
pub use input::{InputEvent, InputMask, KeyCode, MouseButton};
pub use operation::{Operation, OperationContext, OperationReturn};
pub use registry::OperationRegistry;
