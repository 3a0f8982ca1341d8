use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cadflow_core::access::AccessLog;
use cadflow_core::block::TextBlock;
use cadflow_core::document::{Document, DocumentId, DocumentObserver};
use cadflow_core::entity::{CadObject, ElementKind, OperationId, Uid};
use cadflow_core::history::{HistoryEntry, HistoryRecord, HistoryTarget, LifeStatus, RecordKind};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::errors::{EngineError, OperationFault};
use crate::input::{InputEvent, KeyCode};
use crate::operation::{Operation, OperationContext, OperationReturn};
use crate::registry::OperationRegistry;

/// 操作开始前实体表的保存快照。
type Snapshot = HashMap<Uid, (ElementKind, TextBlock)>;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub vertex_snapping: bool,
    pub link_distance: f64,
    /// 0 表示不限制历史记录数量。
    pub history_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            vertex_snapping: false,
            link_distance: 10.0,
            history_limit: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Committed { record_created: bool },
    Cancelled,
    Faulted(String),
}

#[derive(Debug)]
struct ActiveOperation {
    id: OperationId,
    document: DocumentId,
    input: Sender<InputEvent>,
    cancel: Sender<()>,
}

/// 正在运行的操作的句柄。
#[derive(Debug)]
pub struct OperationHandle {
    id: OperationId,
    name: &'static str,
    input: Sender<InputEvent>,
    cancel: Sender<()>,
    done: Receiver<OperationOutcome>,
    thread: Option<JoinHandle<()>>,
}

impl OperationHandle {
    #[inline]
    pub fn id(&self) -> OperationId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 直接向该操作投递事件，不经过活动文档的分发。
    pub fn send(&self, event: InputEvent) -> bool {
        self.input.send(event).is_ok()
    }

    /// 请求协作式取消，操作在下一次等待输入时退出。
    pub fn cancel(&self) {
        let _ = self.cancel.try_send(());
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| thread.is_finished())
            .unwrap_or(true)
    }

    /// 至多等待 `timeout`；超时时交还句柄。
    pub fn wait_timeout(self, timeout: Duration) -> Result<OperationOutcome, OperationHandle> {
        match self.done.recv_timeout(timeout) {
            Ok(outcome) => Ok(self.finish(outcome)),
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => Ok(self.finish(OperationOutcome::Faulted(
                "worker exited without an outcome".to_string(),
            ))),
        }
    }

    fn finish(mut self, outcome: OperationOutcome) -> OperationOutcome {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        outcome
    }

    /// 阻塞直到操作结束。
    pub fn wait(self) -> OperationOutcome {
        let outcome = self
            .done
            .recv()
            .unwrap_or_else(|_| OperationOutcome::Faulted("worker exited without an outcome".to_string()));
        self.finish(outcome)
    }
}

/// 操作引擎：持有已打开的文档、活动文档以及正在运行的操作。
///
/// 由应用入口显式构造并按引用传递。
pub struct OperationEngine {
    registry: OperationRegistry,
    settings: EngineSettings,
    snapping: Arc<AtomicBool>,
    documents: BTreeMap<DocumentId, Arc<Document>>,
    active_document: Option<DocumentId>,
    next_document: u64,
    next_operation: AtomicU64,
    active: Arc<Mutex<Vec<ActiveOperation>>>,
    observer: Option<Arc<dyn DocumentObserver>>,
}

impl OperationEngine {
    pub fn new(registry: OperationRegistry, settings: EngineSettings) -> Self {
        let snapping = Arc::new(AtomicBool::new(settings.vertex_snapping));
        Self {
            registry,
            settings,
            snapping,
            documents: BTreeMap::new(),
            active_document: None,
            next_document: 1,
            next_operation: AtomicU64::new(1),
            active: Arc::new(Mutex::new(Vec::new())),
            observer: None,
        }
    }

    #[inline]
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    #[inline]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// 观察者会挂到所有已打开和之后打开的文档上。
    pub fn set_observer(&mut self, observer: Option<Arc<dyn DocumentObserver>>) {
        for document in self.documents.values() {
            document.set_observer(observer.clone());
        }
        self.observer = observer;
    }

    /// 新建空文档并设为活动文档。
    pub fn create_document(&mut self) -> DocumentId {
        self.open_document(Document::new())
    }

    /// 接管外部构建（例如从文件载入）的文档并设为活动文档。
    pub fn open_document(&mut self, mut document: Document) -> DocumentId {
        let id = DocumentId::new(self.next_document);
        self.next_document += 1;
        document.set_id(id);
        document.set_history_limit(self.settings.history_limit);
        document.set_observer(self.observer.clone());
        info!(document = id.get(), entities = document.len(), "打开文档");
        self.documents.insert(id, Arc::new(document));
        self.active_document = Some(id);
        id
    }

    /// 切换活动文档。之前文档上的操作继续运行，但不再接收输入。
    pub fn set_active_document(&mut self, id: DocumentId) -> bool {
        if !self.documents.contains_key(&id) {
            warn!(error = %EngineError::UnknownDocument(id), "切换活动文档失败");
            return false;
        }
        self.active_document = Some(id);
        true
    }

    #[inline]
    pub fn active_document_id(&self) -> Option<DocumentId> {
        self.active_document
    }

    pub fn active_document(&self) -> Option<Arc<Document>> {
        self.active_document
            .and_then(|id| self.documents.get(&id).cloned())
    }

    pub fn document(&self, id: DocumentId) -> Option<Arc<Document>> {
        self.documents.get(&id).cloned()
    }

    pub fn document_ids(&self) -> Vec<DocumentId> {
        self.documents.keys().copied().collect()
    }

    /// 关闭文档并取消其上仍在运行的操作。
    pub fn close_document(&mut self, id: DocumentId) -> Option<Arc<Document>> {
        let document = self.documents.remove(&id)?;
        for operation in self.active.lock().iter().filter(|op| op.document == id) {
            let _ = operation.cancel.try_send(());
        }
        if self.active_document == Some(id) {
            self.active_document = None;
        }
        info!(document = id.get(), "关闭文档");
        Some(document)
    }

    #[inline]
    pub fn is_snapping(&self) -> bool {
        self.snapping.load(Ordering::Relaxed)
    }

    pub fn set_snapping(&self, enabled: bool) {
        self.snapping.store(enabled, Ordering::Relaxed);
    }

    /// 正在运行的操作数量（所有文档）。
    pub fn active_operation_count(&self) -> usize {
        self.active.lock().len()
    }

    /// 在活动文档上启动操作；没有活动文档或操作未注册时记录警告并返回 `None`。
    pub fn begin_operation(&self, name: &str) -> Option<OperationHandle> {
        match self.try_begin_operation(name) {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(operation = name, error = %err, "无法启动操作");
                None
            }
        }
    }

    pub fn try_begin_operation(&self, name: &str) -> Result<OperationHandle, EngineError> {
        let document = self.active_document().ok_or(EngineError::NoActiveDocument)?;
        let operation = self
            .registry
            .create(name)
            .ok_or_else(|| EngineError::UnknownOperation(name.to_string()))?;
        let id = OperationId::new(self.next_operation.fetch_add(1, Ordering::SeqCst));
        let operation_name = operation.name();

        let old = document.snapshot_blocks();
        document.start_access_recording();
        document.register_operation(id);

        let (input_tx, input_rx) = unbounded();
        let (cancel_tx, cancel_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        let ctx = OperationContext::new(
            id,
            Arc::clone(&document),
            input_rx,
            (cancel_tx.clone(), cancel_rx),
            Arc::clone(&self.snapping),
            self.settings.link_distance,
        );

        self.active.lock().push(ActiveOperation {
            id,
            document: document.id(),
            input: input_tx.clone(),
            cancel: cancel_tx.clone(),
        });

        let worker_document = Arc::clone(&document);
        let active = Arc::clone(&self.active);
        let spawned = thread::Builder::new()
            .name(format!("operation-{id}"))
            .spawn(move || {
                let outcome = run_operation(operation, ctx, &worker_document, old);
                active.lock().retain(|op| op.id != id);
                let _ = done_tx.send(outcome);
            });

        match spawned {
            Ok(thread) => {
                info!(document = document.id().get(), operation = id.get(), name = operation_name, "操作开始");
                Ok(OperationHandle {
                    id,
                    name: operation_name,
                    input: input_tx,
                    cancel: cancel_tx,
                    done: done_rx,
                    thread: Some(thread),
                })
            }
            Err(err) => {
                self.active.lock().retain(|op| op.id != id);
                document.unregister_operation(id);
                document.stop_access_recording();
                Err(EngineError::Spawn(err))
            }
        }
    }

    /// 把事件按到达顺序转发给活动文档上的全部操作。`M` 键切换顶点吸附。
    pub fn dispatch_input(&self, event: InputEvent) {
        if let Some(document) = self.active_document {
            let active = self.active.lock();
            for operation in active.iter().filter(|op| op.document == document) {
                if operation.input.send(event).is_err() {
                    debug!(operation = operation.id.get(), "操作已结束，事件被丢弃");
                }
            }
        }

        if event == InputEvent::Key(KeyCode::Char('M')) {
            let enabled = !self.snapping.fetch_xor(true, Ordering::Relaxed);
            info!(enabled, "切换顶点吸附");
        }
    }

    pub fn undo(&self) -> bool {
        match self.active_document() {
            Some(document) => document.undo(),
            None => {
                warn!(error = %EngineError::NoActiveDocument, "无法撤销");
                false
            }
        }
    }

    pub fn redo(&self) -> bool {
        match self.active_document() {
            Some(document) => document.redo(),
            None => {
                warn!(error = %EngineError::NoActiveDocument, "无法重做");
                false
            }
        }
    }
}

fn run_operation(
    mut operation: Box<dyn Operation>,
    mut ctx: OperationContext,
    document: &Document,
    old: Snapshot,
) -> OperationOutcome {
    let id = ctx.id();
    let name = operation.name();
    let result = panic::catch_unwind(AssertUnwindSafe(|| operation.execute(&mut ctx)));
    drop(ctx);

    let outcome = match result {
        Ok(Ok(OperationReturn::End)) => {
            let staged = document
                .staging_area(id)
                .map(|area| area.entities())
                .unwrap_or_default();
            let committed: Vec<Uid> = staged
                .into_iter()
                .map(|object| document.commit_entity(object).uid())
                .collect();
            let log = document.stop_access_recording();
            let record_created = match end_operation(document, &old, log, &committed) {
                Some(record) => {
                    info!(operation = id.get(), name, record = %record, "操作完成");
                    document.push_history(record);
                    true
                }
                None => {
                    info!(operation = id.get(), name, "操作完成，无实体变化");
                    false
                }
            };
            OperationOutcome::Committed { record_created }
        }
        Ok(Ok(OperationReturn::Cancel)) | Ok(Err(OperationFault::Cancelled)) => {
            roll_back(document, &old, document.stop_access_recording());
            info!(operation = id.get(), name, "操作已取消");
            OperationOutcome::Cancelled
        }
        Ok(Err(fault)) => {
            roll_back(document, &old, document.stop_access_recording());
            error!(operation = id.get(), name, error = %fault, "操作执行失败");
            OperationOutcome::Faulted(fault.to_string())
        }
        Err(payload) => {
            roll_back(document, &old, document.stop_access_recording());
            let message = panic_message(payload.as_ref());
            error!(operation = id.get(), name, panic = %message, "操作线程发生 panic");
            OperationOutcome::Faulted(message)
        }
    };

    document.unregister_operation(id);
    outcome
}

/// 比对操作前后的实体表，为被触及的实体打上存续状态并打包成一条历史记录。
fn end_operation(
    document: &Document,
    old: &Snapshot,
    log: AccessLog<Uid, CadObject>,
    committed: &[Uid],
) -> Option<HistoryRecord> {
    let mut uids = log.touched;
    for uid in committed {
        if !uids.contains(uid) {
            uids.push(*uid);
        }
    }

    let mut entries = Vec::with_capacity(uids.len());
    for uid in uids {
        let before = old.get(&uid);
        let after = document
            .peek_entity(uid)
            .map(|object| (object.kind(), object.to_block(document.vertices())));
        let entry = match (before, after) {
            (Some((_, before)), Some((kind, state))) => HistoryEntry {
                uid,
                kind,
                status: LifeStatus::Existed,
                state,
                before: Some(before.clone()),
            },
            (None, Some((kind, state))) => HistoryEntry {
                uid,
                kind,
                status: LifeStatus::Created,
                state,
                before: None,
            },
            (Some((kind, before)), None) => HistoryEntry {
                uid,
                kind: *kind,
                status: LifeStatus::Deleted,
                state: before.clone(),
                before: Some(before.clone()),
            },
            (None, None) => continue,
        };
        entries.push(entry);
    }

    (!entries.is_empty()).then(|| HistoryRecord::new(RecordKind::OperationSucceeded, entries))
}

/// 把操作期间触及的已提交实体恢复到操作开始前的样子。
///
/// 被删除的实体以删除时的值重新提交，再和其余被修改的实体一起按快照重新载入
/// （快照同时带回顶点位置）；操作期间直接提交的新实体被移除。
fn roll_back(document: &Document, old: &Snapshot, log: AccessLog<Uid, CadObject>) {
    let AccessLog { touched, mut removed } = log;
    for uid in touched {
        let result = match old.get(&uid) {
            Some((kind, before)) => {
                if let Some(object) = removed.remove(&uid) {
                    if !document.contains(uid) {
                        document.commit_entity(object);
                    }
                }
                document.restore_entity(*kind, uid, before)
            }
            None => {
                document.delete_entity(uid);
                Ok(())
            }
        };
        match result {
            Ok(()) => debug!(document = document.id().get(), uid = uid.get(), "实体已回滚"),
            Err(err) => warn!(document = document.id().get(), uid = uid.get(), error = %err, "回滚实体失败"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_without_document_or_name_is_a_no_op() {
        let mut engine = OperationEngine::new(OperationRegistry::with_defaults(), EngineSettings::default());
        assert!(engine.begin_operation("Create Line").is_none());

        engine.create_document();
        assert!(engine.begin_operation("Create Spline").is_none());
        assert_eq!(engine.active_operation_count(), 0);
    }

    #[test]
    fn m_key_toggles_snapping() {
        let engine = OperationEngine::new(OperationRegistry::with_defaults(), EngineSettings::default());
        assert!(!engine.is_snapping());
        engine.dispatch_input(InputEvent::Key(KeyCode::Char('M')));
        assert!(engine.is_snapping());
        engine.dispatch_input(InputEvent::Key(KeyCode::Char('M')));
        assert!(!engine.is_snapping());
    }

    #[test]
    fn documents_get_sequential_ids_and_switch_activity() {
        let mut engine = OperationEngine::new(OperationRegistry::with_defaults(), EngineSettings::default());
        let first = engine.create_document();
        let second = engine.create_document();
        assert_eq!(engine.active_document_id(), Some(second));
        assert_eq!(engine.document(first).map(|doc| doc.id()), Some(first));

        assert!(engine.set_active_document(first));
        assert!(!engine.set_active_document(DocumentId::new(99)));
        assert_eq!(engine.active_document_id(), Some(first));

        assert!(engine.close_document(first).is_some());
        assert!(engine.active_document().is_none());
        assert_eq!(engine.document_ids(), vec![second]);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(format!("index {}", 3));
        assert_eq!(panic_message(payload.as_ref()), "index 3");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
