use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cadflow_config::AppConfig;
use cadflow_core::document::{Document, DocumentId, DocumentObserver};
use cadflow_core::entity::{Shape, Uid};
use cadflow_engine::{
    EngineSettings, OperationEngine, OperationHandle, OperationOutcome, OperationRegistry,
};
use cadflow_io::{DocumentSaver, NativeFacade};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::FrontendError;
use crate::loader::{DocumentSource, LoadedDocument};
use crate::script::ScriptCommand;

/// 脚本中 `wait` 对单个操作的最长等待时间。
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// 以实体键（如 `Line, 1`）镜像文档内容的观察者，充当树形视图。
#[derive(Debug, Default)]
pub struct ConsoleTree {
    nodes: Mutex<BTreeMap<Uid, String>>,
    replays: AtomicUsize,
}

impl ConsoleTree {
    /// 以文档现有实体初始化节点。
    pub fn seed(&self, document: &Document) {
        let mut nodes = self.nodes.lock();
        for object in document.entities() {
            nodes.insert(object.uid(), object.to_string());
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.nodes.lock().values().cloned().collect()
    }

    pub fn replay_count(&self) -> usize {
        self.replays.load(Ordering::Relaxed)
    }
}

impl DocumentObserver for ConsoleTree {
    fn entity_committed(&self, document: DocumentId, key: &str, uid: Uid) {
        debug!(document = document.get(), uid = uid.get(), key, "树节点已添加");
        self.nodes.lock().insert(uid, key.to_string());
    }

    fn entity_deleted(&self, document: DocumentId, key: &str, uid: Uid) {
        debug!(document = document.get(), uid = uid.get(), key, "树节点已移除");
        self.nodes.lock().remove(&uid);
    }

    fn history_replayed(&self, _document: DocumentId) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityListing {
    pub uid: u64,
    pub kind: String,
    pub vertices: Vec<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_angle: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_angle: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSummary {
    pub name: String,
    pub outcome: String,
}

/// 会话结束时的文档清单。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentListing {
    pub source: String,
    pub vertex_count: usize,
    pub history_level: usize,
    pub history_len: usize,
    pub entities: Vec<EntityListing>,
    pub tree: Vec<String>,
    pub operations: Vec<OperationSummary>,
}

fn describe_outcome(outcome: &OperationOutcome) -> String {
    match outcome {
        OperationOutcome::Committed {
            record_created: true,
        } => "committed".to_string(),
        OperationOutcome::Committed {
            record_created: false,
        } => "committed (no changes)".to_string(),
        OperationOutcome::Cancelled => "cancelled".to_string(),
        OperationOutcome::Faulted(message) => format!("faulted: {message}"),
    }
}

fn list_document(document: &Document) -> Vec<EntityListing> {
    let arena = document.vertices();
    document
        .entities()
        .into_iter()
        .map(|object| {
            let vertices = (0..object.vertex_indices().len())
                .filter_map(|slot| object.position(arena, slot))
                .map(|point| [point.x(), point.y(), point.z()])
                .collect();
            let (radius, start_angle, end_angle) = match object.shape() {
                Shape::Line => (None, None, None),
                Shape::Circle(circle) => (Some(circle.radius), None, None),
                Shape::Arc(arc) => (Some(arc.radius), Some(arc.start_angle), Some(arc.end_angle)),
            };
            EntityListing {
                uid: object.uid().get(),
                kind: object.kind().name().to_string(),
                vertices,
                radius,
                start_angle,
                end_angle,
            }
        })
        .collect()
}

struct Session<'a> {
    config: &'a AppConfig,
    engine: OperationEngine,
    facade: NativeFacade,
    pending: Vec<OperationHandle>,
    operations: Vec<OperationSummary>,
}

impl Session<'_> {
    fn record(&mut self, name: &str, outcome: &OperationOutcome) {
        info!(operation = name, outcome = ?outcome, "操作结束");
        self.operations.push(OperationSummary {
            name: name.to_string(),
            outcome: describe_outcome(outcome),
        });
    }

    /// 等待全部未结束的操作；超时的操作被取消。
    fn wait_all(&mut self) {
        for handle in std::mem::take(&mut self.pending) {
            let name = handle.name();
            let outcome = match handle.wait_timeout(WAIT_TIMEOUT) {
                Ok(outcome) => outcome,
                Err(handle) => {
                    warn!(operation = name, "操作等待超时，发送取消信号");
                    handle.cancel();
                    handle.wait()
                }
            };
            self.record(name, &outcome);
        }
    }

    /// 取消尚未结束的操作。已排队的输入仍会先被处理。
    fn cancel_all(&mut self) {
        for handle in &self.pending {
            handle.cancel();
        }
        for handle in std::mem::take(&mut self.pending) {
            let name = handle.name();
            let outcome = handle.wait();
            self.record(name, &outcome);
        }
    }

    fn apply(&mut self, command: &ScriptCommand) -> Result<(), FrontendError> {
        match command {
            ScriptCommand::Begin(name) => {
                if let Some(handle) = self.engine.begin_operation(name) {
                    self.pending.push(handle);
                }
            }
            ScriptCommand::Input(event) => self.engine.dispatch_input(*event),
            ScriptCommand::Wait => self.wait_all(),
            ScriptCommand::Undo => {
                if !self.engine.undo() {
                    debug!("没有可撤销的记录");
                }
            }
            ScriptCommand::Redo => {
                if !self.engine.redo() {
                    debug!("没有可重做的记录");
                }
            }
            ScriptCommand::Save(path) => {
                let path = self.config.storage.resolve(path);
                match self.engine.active_document() {
                    Some(document) => self.facade.save(&document, &path)?,
                    None => warn!(path = %path.display(), "没有活动文档，跳过保存"),
                }
            }
        }
        Ok(())
    }
}

/// 在新的引擎上执行脚本并返回最终文档清单。脚本结束时仍在运行的操作会被取消。
pub fn run_session(
    config: &AppConfig,
    commands: &[ScriptCommand],
    loaded: LoadedDocument,
) -> Result<(DocumentListing, Arc<Document>), FrontendError> {
    let tree = Arc::new(ConsoleTree::default());
    tree.seed(&loaded.document);

    let settings = EngineSettings {
        vertex_snapping: config.engine.vertex_snapping,
        link_distance: config.engine.link_distance,
        history_limit: config.history.max_records,
    };
    let mut engine = OperationEngine::new(OperationRegistry::with_defaults(), settings);
    engine.set_observer(Some(tree.clone() as Arc<dyn DocumentObserver>));
    let document_id = engine.open_document(loaded.document);

    let mut session = Session {
        config,
        engine,
        facade: NativeFacade::with_version(config.storage.format_version.clone()),
        pending: Vec::new(),
        operations: Vec::new(),
    };
    let mut result = Ok(());
    for command in commands {
        result = session.apply(command);
        if result.is_err() {
            break;
        }
    }
    session.cancel_all();
    result?;

    let document = session
        .engine
        .document(document_id)
        .unwrap_or_else(|| Arc::new(Document::new()));
    let source = match &loaded.source {
        DocumentSource::File(path) => path.display().to_string(),
        DocumentSource::Empty => "empty".to_string(),
    };
    let listing = DocumentListing {
        source,
        vertex_count: document.vertices().len(),
        history_level: document.history_level(),
        history_len: document.history_len(),
        entities: list_document(&document),
        tree: tree.keys(),
        operations: session.operations,
    };
    Ok((listing, document))
}

/// 打印文档清单：JSON 或中文摘要。
pub fn print_listing(listing: &DocumentListing, json: bool) -> Result<(), FrontendError> {
    if json {
        println!("{}", serde_json::to_string_pretty(listing)?);
        return Ok(());
    }

    println!("cadflow 会话结束");
    println!("文档来源：{}", listing.source);
    for operation in &listing.operations {
        println!("  操作 {} → {}", operation.name, operation.outcome);
    }
    println!(
        "顶点数={}, 历史位置={}/{}",
        listing.vertex_count, listing.history_level, listing.history_len
    );
    if listing.entities.is_empty() {
        println!("当前文档没有实体。");
        return Ok(());
    }
    println!("当前文档实体：");
    for entity in &listing.entities {
        let points: Vec<String> = entity
            .vertices
            .iter()
            .map(|[x, y, z]| format!("({x:.2}, {y:.2}, {z:.2})"))
            .collect();
        print!("  - {} #{}, 顶点={}", entity.kind, entity.uid, points.join(" "));
        if let Some(radius) = entity.radius {
            print!(", 半径={radius:.3}");
        }
        if let (Some(start), Some(end)) = (entity.start_angle, entity.end_angle) {
            print!(", 角度=[{start:.3}, {end:.3}]");
        }
        println!();
    }
    Ok(())
}
