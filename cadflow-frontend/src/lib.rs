pub mod cli;
pub mod errors;
pub mod loader;
pub mod script;

use std::fs;
use std::path::PathBuf;

use cadflow_config::AppConfig;
use cadflow_io::{DocumentSaver, NativeFacade};
use errors::FrontendError;
use tracing::info;

pub use cli::{ConsoleTree, DocumentListing, print_listing, run_session};
pub use loader::{DocumentSource, LoadedDocument, load_document};
pub use script::{ScriptCommand, parse_script};

/// 命令行会话的输入。
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub open: Option<PathBuf>,
    pub script: Option<PathBuf>,
    pub save: Option<PathBuf>,
    pub json: bool,
}

/// 载入文档、执行脚本、按需保存并打印清单。
pub fn run_cli(config: &AppConfig, options: &CliOptions) -> Result<(), FrontendError> {
    let commands = match &options.script {
        Some(path) => {
            let source = fs::read_to_string(path).map_err(|source| FrontendError::ReadScript {
                path: path.clone(),
                source,
            })?;
            parse_script(&source)?
        }
        None => Vec::new(),
    };
    info!(commands = commands.len(), "启动 CLI 会话");

    let loaded = load_document(options.open.as_deref(), &config.storage);
    let (listing, document) = run_session(config, &commands, loaded)?;

    if let Some(path) = &options.save {
        let path = config.storage.resolve(path);
        NativeFacade::with_version(config.storage.format_version.clone()).save(&document, &path)?;
    }
    print_listing(&listing, options.json)
}
