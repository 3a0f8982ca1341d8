use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::access::{AccessLog, AccessTracker};
use crate::block::TextBlock;
use crate::entity::{CadObject, ElementKind, EntityError, OperationId, Uid, UidRequest};
use crate::geometry::{Bounds3, Point3};
use crate::history::{
    HistoryEntry, HistoryManager, HistoryRecord, HistoryTarget, LifeStatus, RecordKind,
};
use crate::vertex::VertexArena;

const VERTICES_BLOCK: &str = "allVertices";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DocumentId(u64);

impl DocumentId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("operation {0} has no staging area in this document")]
    OperationNotRegistered(OperationId),
    #[error("entity with uid {0} already exists")]
    DuplicateUid(Uid),
    #[error("entity with uid {0} not found")]
    EntityNotFound(Uid),
    #[error("invalid document structure: {0}")]
    InvalidStructure(String),
    #[error(transparent)]
    Entity(#[from] EntityError),
}

/// 界面侧协作者的回调（树视图、属性面板等），默认实现均为空。
///
/// 回调在不持有文档内部锁的情况下触发，可以在回调中查询文档。
/// 撤销/重做产生的提交与删除通知在回放结束、历史锁释放后按发生顺序派发。
pub trait DocumentObserver: Send + Sync {
    fn entity_committed(&self, _document: DocumentId, _key: &str, _uid: Uid) {}

    fn entity_deleted(&self, _document: DocumentId, _key: &str, _uid: Uid) {}

    fn history_replayed(&self, _document: DocumentId) {}
}

/// 延后派发的观察者通知。
#[derive(Debug)]
enum Notice {
    Committed(String, Uid),
    Deleted(String, Uid),
}

/// 单个操作私有的暂存区，存放尚未提交的实体。
#[derive(Debug)]
pub struct StagingArea {
    operation: OperationId,
    entities: RwLock<HashMap<Uid, CadObject>>,
}

impl StagingArea {
    fn new(operation: OperationId) -> Self {
        Self {
            operation,
            entities: RwLock::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn operation(&self) -> OperationId {
        self.operation
    }

    pub fn insert(&self, object: CadObject) {
        self.entities.write().insert(object.uid(), object);
    }

    pub fn remove(&self, uid: Uid) -> Option<CadObject> {
        self.entities.write().remove(&uid)
    }

    pub fn get(&self, uid: Uid) -> Option<CadObject> {
        self.entities.read().get(&uid).cloned()
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.entities.read().contains_key(&uid)
    }

    pub fn with_mut<R>(&self, uid: Uid, f: impl FnOnce(&mut CadObject) -> R) -> Option<R> {
        self.entities.write().get_mut(&uid).map(f)
    }

    /// 按 UID 升序返回暂存实体。
    pub fn entities(&self) -> Vec<CadObject> {
        let mut objects: Vec<CadObject> = self.entities.read().values().cloned().collect();
        objects.sort_by_key(|object| object.uid());
        objects
    }

    /// 暂存实体引用的全部顶点索引，吸附时需要排除。
    pub fn vertex_indices(&self) -> HashSet<usize> {
        self.entities
            .read()
            .values()
            .flat_map(|object| object.vertex_indices().iter().copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}

/// CAD 文档：顶点池、已提交实体表、暂存表以及撤销历史。
///
/// 所有方法都只需要 `&self`，后台操作线程与界面线程共享同一个 `Arc<Document>`。
/// 加锁顺序固定为：历史 → 实体表/暂存区 → 顶点池。
pub struct Document {
    id: DocumentId,
    vertices: VertexArena,
    registry: AccessTracker<Uid, CadObject>,
    staging: RwLock<HashMap<OperationId, Arc<StagingArea>>>,
    next_uid: AtomicU64,
    history: Mutex<HistoryManager>,
    observer: RwLock<Option<Arc<dyn DocumentObserver>>>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("entities", &self.registry.len())
            .field("vertices", &self.vertices.len())
            .field("history_level", &self.history_level())
            .finish_non_exhaustive()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            id: DocumentId::default(),
            vertices: VertexArena::new(),
            registry: AccessTracker::new(),
            staging: RwLock::new(HashMap::new()),
            next_uid: AtomicU64::new(1),
            history: Mutex::new(HistoryManager::default()),
            observer: RwLock::new(None),
        }
    }

    /// 从保存块构建新文档；结构错误时不产生任何部分结果。
    pub fn from_block(block: &TextBlock) -> Result<Self, DocumentError> {
        let document = Self::new();
        document.load_block(block)?;
        Ok(document)
    }

    #[inline]
    pub fn id(&self) -> DocumentId {
        self.id
    }

    /// 由引擎在接管文档时分配标识。
    pub fn set_id(&mut self, id: DocumentId) {
        self.id = id;
    }

    #[inline]
    pub fn vertices(&self) -> &VertexArena {
        &self.vertices
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn DocumentObserver>>) {
        *self.observer.write() = observer;
    }

    pub fn set_history_limit(&self, max_records: usize) {
        self.history.lock().set_max_records(max_records);
    }

    fn observer(&self) -> Option<Arc<dyn DocumentObserver>> {
        self.observer.read().clone()
    }

    fn allocate_uid(&self, request: UidRequest) -> Uid {
        match request {
            UidRequest::Auto => Uid::new(self.next_uid.fetch_add(1, Ordering::SeqCst)),
            UidRequest::Fixed(uid) => {
                self.next_uid.fetch_max(uid.get() + 1, Ordering::SeqCst);
                uid
            }
        }
    }

    /// 创建实体。带 `owner` 时放入该操作的暂存区，对实体表不可见；否则立即提交。
    pub fn create_entity(
        &self,
        kind: ElementKind,
        request: UidRequest,
        owner: Option<OperationId>,
    ) -> Result<CadObject, DocumentError> {
        if let UidRequest::Fixed(uid) = request {
            if self.registry.contains_key(&uid) || self.is_staged(uid) {
                return Err(DocumentError::DuplicateUid(uid));
            }
        }

        match owner {
            Some(operation) => {
                let area = self
                    .staging_area(operation)
                    .ok_or(DocumentError::OperationNotRegistered(operation))?;
                let uid = self.allocate_uid(request);
                let mut object = CadObject::new(uid, kind);
                object.set_owner(Some(operation));
                area.insert(object.clone());
                debug!(document = self.id.get(), uid = uid.get(), operation = operation.get(), kind = %kind, "实体已暂存");
                Ok(object)
            }
            None => {
                let uid = self.allocate_uid(request);
                Ok(self.commit_entity(CadObject::new(uid, kind)))
            }
        }
    }

    /// 提交实体到实体表，返回提交后的副本。
    ///
    /// 实体若带有操作标记，先从对应暂存区移除；缺失的顶点槽位在提交时补齐；
    /// 首次进入实体表时通知观察者。
    pub fn commit_entity(&self, object: CadObject) -> CadObject {
        let mut notices = Vec::new();
        let object = self.commit_into(object, &mut notices);
        self.dispatch(notices);
        object
    }

    fn commit_into(&self, mut object: CadObject, notices: &mut Vec<Notice>) -> CadObject {
        let uid = object.uid();
        if let Some(operation) = object.owner() {
            if let Some(area) = self.staging_area(operation) {
                area.remove(uid);
            }
            object.set_owner(None);
        }
        object.reserve_slots(&self.vertices);

        let is_new = !self.registry.contains_key(&uid);
        if is_new {
            object.mark_post_created();
        }
        self.registry.insert(uid, object.clone());

        if is_new {
            debug!(document = self.id.get(), uid = uid.get(), "实体已提交");
            notices.push(Notice::Committed(object.to_string(), uid));
        }
        object
    }

    /// 从实体表移除实体；不存在时忽略。
    pub fn delete_entity(&self, uid: Uid) -> Option<CadObject> {
        let mut notices = Vec::new();
        let removed = self.delete_into(uid, &mut notices);
        self.dispatch(notices);
        removed
    }

    fn delete_into(&self, uid: Uid, notices: &mut Vec<Notice>) -> Option<CadObject> {
        let removed = self.registry.remove(&uid)?;
        debug!(document = self.id.get(), uid = uid.get(), "实体已删除");
        notices.push(Notice::Deleted(removed.to_string(), uid));
        Some(removed)
    }

    fn dispatch(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        let Some(observer) = self.observer() else {
            return;
        };
        for notice in notices {
            match notice {
                Notice::Committed(key, uid) => observer.entity_committed(self.id, &key, uid),
                Notice::Deleted(key, uid) => observer.entity_deleted(self.id, &key, uid),
            }
        }
    }

    /// 直接修改已提交实体的属性，并追加一条属性变更记录。
    pub fn edit_entity<R>(
        &self,
        uid: Uid,
        f: impl FnOnce(&mut CadObject, &VertexArena) -> R,
    ) -> Option<R> {
        let mut history = self.history.lock();
        let (result, kind, before, after) = self.registry.with_mut(&uid, |object| {
            let before = object.to_block(&self.vertices);
            let result = f(object, &self.vertices);
            let after = object.to_block(&self.vertices);
            (result, object.kind(), before, after)
        })?;

        history.add_undo(HistoryRecord::new(
            RecordKind::PropertyChanged,
            vec![HistoryEntry {
                uid,
                kind,
                status: LifeStatus::Existed,
                state: after,
                before: Some(before),
            }],
        ));
        Some(result)
    }

    /// 读取实体副本（记录访问）。
    pub fn entity(&self, uid: Uid) -> Option<CadObject> {
        self.registry.get(&uid)
    }

    /// 在实体表锁内访问实体（记录访问）。
    pub fn with_entity<R>(&self, uid: Uid, f: impl FnOnce(&CadObject, &VertexArena) -> R) -> Option<R> {
        self.registry.with_mut(&uid, |object| f(object, &self.vertices))
    }

    /// 在实体表锁内修改实体，不产生历史记录（记录访问）。
    pub fn with_entity_mut<R>(
        &self,
        uid: Uid,
        f: impl FnOnce(&mut CadObject, &VertexArena) -> R,
    ) -> Option<R> {
        self.registry.with_mut(&uid, |object| f(object, &self.vertices))
    }

    /// 按 UID 升序返回全部已提交实体，不记录访问。
    pub fn entities(&self) -> Vec<CadObject> {
        let mut objects = self.registry.values();
        objects.sort_by_key(|object| object.uid());
        objects
    }

    pub fn uids(&self) -> Vec<Uid> {
        let mut uids = self.registry.keys();
        uids.sort();
        uids
    }

    #[inline]
    pub fn contains(&self, uid: Uid) -> bool {
        self.registry.contains_key(&uid)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// 读取实体副本，不记录访问。
    pub fn peek_entity(&self, uid: Uid) -> Option<CadObject> {
        self.registry.peek(&uid, CadObject::clone)
    }

    /// 已提交实体的保存块，不记录访问。
    pub fn entity_block(&self, uid: Uid) -> Option<TextBlock> {
        self.registry
            .peek(&uid, |object| object.to_block(&self.vertices))
    }

    /// 全部已提交实体的保存块快照，供操作结束时比对。
    pub fn snapshot_blocks(&self) -> HashMap<Uid, (ElementKind, TextBlock)> {
        self.entities()
            .into_iter()
            .map(|object| (object.uid(), (object.kind(), object.to_block(&self.vertices))))
            .collect()
    }

    pub fn bounds(&self) -> Option<Bounds3> {
        let mut bounds = Bounds3::empty();
        for object in self.entities() {
            if let Some(entity_bounds) = object.bounds(&self.vertices) {
                bounds.include_bounds(&entity_bounds);
            }
        }
        (!bounds.is_empty()).then_some(bounds)
    }

    pub fn start_access_recording(&self) {
        self.registry.start_recording();
    }

    pub fn stop_access_recording(&self) -> AccessLog<Uid, CadObject> {
        self.registry.stop_recording()
    }

    pub fn register_operation(&self, operation: OperationId) -> Arc<StagingArea> {
        let area = Arc::new(StagingArea::new(operation));
        self.staging.write().insert(operation, Arc::clone(&area));
        area
    }

    /// 注销暂存区，其中尚未提交的实体随之丢弃。
    pub fn unregister_operation(&self, operation: OperationId) -> Option<Arc<StagingArea>> {
        let area = self.staging.write().remove(&operation)?;
        if !area.is_empty() {
            debug!(document = self.id.get(), operation = operation.get(), discarded = area.len(), "丢弃暂存实体");
        }
        Some(area)
    }

    pub fn staging_area(&self, operation: OperationId) -> Option<Arc<StagingArea>> {
        self.staging.read().get(&operation).cloned()
    }

    pub fn with_staged<R>(
        &self,
        operation: OperationId,
        uid: Uid,
        f: impl FnOnce(&mut CadObject, &VertexArena) -> R,
    ) -> Option<R> {
        let area = self.staging_area(operation)?;
        area.with_mut(uid, |object| f(object, &self.vertices))
    }

    pub fn staged_len(&self, operation: OperationId) -> usize {
        self.staging_area(operation)
            .map(|area| area.len())
            .unwrap_or(0)
    }

    pub fn is_staged(&self, uid: Uid) -> bool {
        self.staging.read().values().any(|area| area.contains(uid))
    }

    pub fn push_history(&self, record: HistoryRecord) {
        self.history.lock().add_undo(record);
    }

    pub fn undo(&self) -> bool {
        let replay = Replay::new(self);
        let replayed = self.history.lock().undo(&replay);
        self.dispatch(replay.into_notices());
        if replayed {
            info!(document = self.id.get(), level = self.history_level(), "撤销完成");
            self.notify_history_replayed();
        }
        replayed
    }

    pub fn redo(&self) -> bool {
        let replay = Replay::new(self);
        let replayed = self.history.lock().redo(&replay);
        self.dispatch(replay.into_notices());
        if replayed {
            info!(document = self.id.get(), level = self.history_level(), "重做完成");
            self.notify_history_replayed();
        }
        replayed
    }

    fn notify_history_replayed(&self) {
        if let Some(observer) = self.observer() {
            observer.history_replayed(self.id);
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.lock().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.lock().can_redo()
    }

    pub fn history_level(&self) -> usize {
        self.history.lock().level()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn with_history<R>(&self, f: impl FnOnce(&HistoryManager) -> R) -> R {
        f(&self.history.lock())
    }

    /// 文档保存块：`allVertices` 子块加上每个实体一个子块。
    pub fn save(&self) -> TextBlock {
        let mut root = TextBlock::root();
        let vertices = root.add_child(VERTICES_BLOCK);
        for point in self.vertices.snapshot() {
            vertices
                .add_child("element")
                .set_attribute("x", point.x())
                .set_attribute("y", point.y())
                .set_attribute("z", point.z());
        }
        for object in self.entities() {
            root.push_child(object.to_block(&self.vertices));
        }
        root
    }

    /// 以保存块替换文档内容。先在独立的顶点池上完整解析，成功后才替换，历史随之清空。
    pub fn load_block(&self, block: &TextBlock) -> Result<(), DocumentError> {
        let arena = VertexArena::new();
        if let Some(vertices) = block.find_child(VERTICES_BLOCK) {
            let mut points = Vec::with_capacity(vertices.children().len());
            for (index, element) in vertices.children().iter().enumerate() {
                points.push(parse_vertex(index, element));
            }
            arena.replace_all(points);
        }

        let mut objects: HashMap<Uid, CadObject> = HashMap::new();
        for child in block.children() {
            if child.name() == VERTICES_BLOCK {
                continue;
            }
            let mut object = CadObject::from_block(&arena, child)?;
            object.mark_post_created();
            let uid = object.uid();
            if objects.insert(uid, object).is_some() {
                return Err(DocumentError::DuplicateUid(uid));
            }
        }

        let next = objects.keys().map(|uid| uid.get() + 1).max().unwrap_or(1);
        let count = objects.len();
        {
            let mut history = self.history.lock();
            self.registry.replace_all(objects);
            self.vertices.replace_all(arena.snapshot());
            history.clear();
        }
        self.next_uid.fetch_max(next, Ordering::SeqCst);
        info!(document = self.id.get(), entities = count, vertices = self.vertices.len(), "文档已载入");
        Ok(())
    }
}

fn parse_vertex(index: usize, element: &TextBlock) -> Point3 {
    let mut point = Point3::origin().as_vec3();
    for (key, target) in [("x", &mut point.x), ("y", &mut point.y), ("z", &mut point.z)] {
        let Some(raw) = element.attribute(key) else {
            continue;
        };
        match raw.trim().parse::<f64>() {
            Ok(value) => *target = value,
            Err(err) => {
                warn!(index, field = key, value = raw, error = %err, "顶点坐标解析失败，按 0 处理");
            }
        }
    }
    Point3(point)
}

impl Document {
    fn restore_into(
        &self,
        kind: ElementKind,
        uid: Uid,
        state: &TextBlock,
        notices: &mut Vec<Notice>,
    ) -> Result<(), DocumentError> {
        if self.registry.contains_key(&uid) {
            return self.reload_entity(uid, state);
        }
        self.allocate_uid(UidRequest::Fixed(uid));
        let mut object = CadObject::new(uid, kind);
        object.load(&self.vertices, state)?;
        self.commit_into(object, notices);
        Ok(())
    }
}

impl HistoryTarget for Document {
    fn restore_entity(
        &self,
        kind: ElementKind,
        uid: Uid,
        state: &TextBlock,
    ) -> Result<(), DocumentError> {
        let mut notices = Vec::new();
        let result = self.restore_into(kind, uid, state, &mut notices);
        self.dispatch(notices);
        result
    }

    fn reload_entity(&self, uid: Uid, state: &TextBlock) -> Result<(), DocumentError> {
        self.registry
            .with_mut(&uid, |object| object.load(&self.vertices, state))
            .ok_or(DocumentError::EntityNotFound(uid))??;
        Ok(())
    }

    fn remove_entity(&self, uid: Uid) {
        self.delete_entity(uid);
    }
}

/// 撤销/重做期间的回放目标：实体变化立即生效，观察者通知先攒下，
/// 由调用方在释放历史锁之后派发。
struct Replay<'a> {
    document: &'a Document,
    notices: RefCell<Vec<Notice>>,
}

impl<'a> Replay<'a> {
    fn new(document: &'a Document) -> Self {
        Self {
            document,
            notices: RefCell::new(Vec::new()),
        }
    }

    fn into_notices(self) -> Vec<Notice> {
        self.notices.into_inner()
    }
}

impl HistoryTarget for Replay<'_> {
    fn restore_entity(
        &self,
        kind: ElementKind,
        uid: Uid,
        state: &TextBlock,
    ) -> Result<(), DocumentError> {
        self.document
            .restore_into(kind, uid, state, &mut self.notices.borrow_mut())
    }

    fn reload_entity(&self, uid: Uid, state: &TextBlock) -> Result<(), DocumentError> {
        self.document.reload_entity(uid, state)
    }

    fn remove_entity(&self, uid: Uid) {
        self.document.delete_into(uid, &mut self.notices.borrow_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl DocumentObserver for Events {
        fn entity_committed(&self, _document: DocumentId, key: &str, _uid: Uid) {
            self.0.lock().push(format!("+{key}"));
        }

        fn entity_deleted(&self, _document: DocumentId, key: &str, _uid: Uid) {
            self.0.lock().push(format!("-{key}"));
        }

        fn history_replayed(&self, _document: DocumentId) {
            self.0.lock().push("history".to_string());
        }
    }

    fn committed_line(document: &Document, start: Point3, end: Point3) -> Uid {
        let object = document
            .create_entity(ElementKind::Line, UidRequest::Auto, None)
            .unwrap();
        document
            .with_entity_mut(object.uid(), |object, arena| {
                let mut line = object.as_line(arena).unwrap();
                line.set_start(start);
                line.set_end(end);
            })
            .unwrap();
        object.uid()
    }

    #[test]
    fn auto_uids_are_monotonic_and_skip_fixed_ones() {
        let document = Document::new();
        let a = document
            .create_entity(ElementKind::Line, UidRequest::Auto, None)
            .unwrap();
        let b = document
            .create_entity(ElementKind::Circle, UidRequest::Fixed(Uid::new(10)), None)
            .unwrap();
        let c = document
            .create_entity(ElementKind::Arc, UidRequest::Auto, None)
            .unwrap();

        assert_eq!(a.uid(), Uid::new(1));
        assert_eq!(b.uid(), Uid::new(10));
        assert_eq!(c.uid(), Uid::new(11));
        assert!(c.post_created());
        assert!(matches!(
            document.create_entity(ElementKind::Line, UidRequest::Fixed(Uid::new(10)), None),
            Err(DocumentError::DuplicateUid(_))
        ));
    }

    #[test]
    fn staged_entities_stay_out_of_the_registry_until_committed() {
        let document = Document::new();
        let operation = OperationId::new(1);
        assert!(matches!(
            document.create_entity(ElementKind::Line, UidRequest::Auto, Some(operation)),
            Err(DocumentError::OperationNotRegistered(_))
        ));

        let area = document.register_operation(operation);
        let staged = document
            .create_entity(ElementKind::Line, UidRequest::Auto, Some(operation))
            .unwrap();
        assert_eq!(staged.owner(), Some(operation));
        assert!(!document.contains(staged.uid()));
        assert!(document.is_staged(staged.uid()));
        assert_eq!(document.staged_len(operation), 1);

        let committed = document.commit_entity(area.get(staged.uid()).unwrap());
        assert_eq!(committed.owner(), None);
        assert!(committed.post_created());
        assert!(document.contains(staged.uid()));
        assert!(!document.is_staged(staged.uid()));
        assert!(area.is_empty());
    }

    #[test]
    fn observer_hears_each_commit_and_delete_once() {
        let document = Document::new();
        let events = Arc::new(Events::default());
        document.set_observer(Some(events.clone() as Arc<dyn DocumentObserver>));

        let uid = committed_line(&document, Point3::origin(), Point3::new(1.0, 0.0, 0.0));
        let object = document.entity(uid).unwrap();
        document.commit_entity(object);
        document.delete_entity(uid);
        document.delete_entity(uid);

        assert_eq!(*events.0.lock(), vec!["+Line, 1", "-Line, 1"]);
    }

    /// 回调里反查文档的观察者。
    #[derive(Default)]
    struct Querying {
        document: Mutex<Option<std::sync::Weak<Document>>>,
        seen: Mutex<Vec<(String, usize, usize)>>,
    }

    impl Querying {
        fn query(&self, key: &str) {
            let document = self.document.lock().as_ref().and_then(|weak| weak.upgrade());
            if let Some(document) = document {
                let level = document.history_level();
                let len = document.len();
                self.seen.lock().push((key.to_string(), level, len));
            }
        }
    }

    impl DocumentObserver for Querying {
        fn entity_committed(&self, _document: DocumentId, key: &str, _uid: Uid) {
            self.query(&format!("+{key}"));
        }

        fn entity_deleted(&self, _document: DocumentId, key: &str, _uid: Uid) {
            self.query(&format!("-{key}"));
        }
    }

    #[test]
    fn observer_may_query_the_document_during_replay() {
        let document = Arc::new(Document::new());
        let observer = Arc::new(Querying::default());
        *observer.document.lock() = Some(Arc::downgrade(&document));
        document.set_observer(Some(observer.clone() as Arc<dyn DocumentObserver>));

        let uid = committed_line(&document, Point3::origin(), Point3::new(1.0, 1.0, 0.0));
        let state = document.entity_block(uid).unwrap();
        document.push_history(HistoryRecord::new(
            RecordKind::OperationSucceeded,
            vec![HistoryEntry {
                uid,
                kind: ElementKind::Line,
                status: LifeStatus::Created,
                state,
                before: None,
            }],
        ));

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let worker = Arc::clone(&document);
        std::thread::spawn(move || {
            let undone = worker.undo();
            let redone = worker.redo();
            let _ = done_tx.send((undone, redone));
        });
        let finished = done_rx.recv_timeout(std::time::Duration::from_secs(5));
        assert_eq!(finished, Ok((true, true)));

        assert_eq!(
            *observer.seen.lock(),
            vec![
                ("+Line, 1".to_string(), 0, 1),
                ("-Line, 1".to_string(), 0, 0),
                ("+Line, 1".to_string(), 1, 1),
            ]
        );
    }

    #[test]
    fn committed_entities_fill_their_vertex_slots() {
        let document = Document::new();
        let line = document
            .create_entity(ElementKind::Line, UidRequest::Auto, None)
            .unwrap();
        assert_eq!(line.vertex_indices(), &[0, 1]);

        let operation = OperationId::new(1);
        document.register_operation(operation);
        let staged = document
            .create_entity(ElementKind::Line, UidRequest::Auto, Some(operation))
            .unwrap();
        document.with_staged(operation, staged.uid(), |object, arena| {
            object.as_line(arena).unwrap().set_start(Point3::new(4.0, 0.0, 0.0));
        });
        let object = document.staging_area(operation).unwrap().get(staged.uid()).unwrap();
        let committed = document.commit_entity(object);
        assert_eq!(committed.vertex_indices().len(), 2);
        assert_eq!(committed.position(document.vertices(), 1), Some(Point3::origin()));

        let mut block = document.save();
        let mut extra = TextBlock::new("Circle");
        extra.set_attribute("uid", 9).set_attribute("elementType", "Circle");
        let vertices = extra.add_child("vertices");
        vertices.add_child("element").set_attribute("index", 0);
        vertices.add_child("element").set_attribute("index", 1);
        block.push_child(extra);
        assert!(matches!(
            Document::from_block(&block),
            Err(DocumentError::Entity(EntityError::InvalidVertex { .. }))
        ));
    }

    #[test]
    fn property_edit_can_be_undone_and_redone() {
        let document = Document::new();
        let circle = document
            .create_entity(ElementKind::Circle, UidRequest::Auto, None)
            .unwrap();
        document
            .with_entity_mut(circle.uid(), |object, arena| {
                let mut view = object.as_circle(arena).unwrap();
                view.set_center(Point3::origin());
                view.set_radius(1.0);
            })
            .unwrap();

        document.edit_entity(circle.uid(), |object, arena| {
            object.as_circle(arena).unwrap().set_radius(5.0);
        });
        assert_eq!(document.history_len(), 1);

        let radius = |document: &Document| {
            document
                .with_entity(circle.uid(), |object, _| match object.shape() {
                    crate::entity::Shape::Circle(shape) => shape.radius,
                    _ => f64::NAN,
                })
                .unwrap()
        };
        assert_eq!(radius(&document), 5.0);
        assert!(document.undo());
        assert_eq!(radius(&document), 1.0);
        assert!(document.redo());
        assert_eq!(radius(&document), 5.0);
        assert!(!document.redo());
    }

    #[test]
    fn edit_of_missing_entity_is_a_no_op() {
        let document = Document::new();
        assert!(document.edit_entity(Uid::new(3), |_, _| ()).is_none());
        assert_eq!(document.history_len(), 0);
        assert!(!document.undo());
    }

    #[test]
    fn save_and_load_reproduce_entities_and_vertices() {
        let document = Document::new();
        let line = committed_line(&document, Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 0.0));
        let arc = document
            .create_entity(ElementKind::Arc, UidRequest::Auto, None)
            .unwrap()
            .uid();
        document.with_entity_mut(arc, |object, arena| {
            let mut view = object.as_arc(arena).unwrap();
            view.set_center(Point3::new(10.0, 10.0, 0.0));
            view.set_radius(3.0);
            view.set_end_angle(1.0);
        });

        let block = document.save();
        let restored = Document::from_block(&block).unwrap();

        assert_eq!(restored.uids(), vec![line, arc]);
        assert_eq!(restored.vertices().snapshot(), document.vertices().snapshot());
        assert_eq!(restored.entities(), document.entities());
        let next = restored
            .create_entity(ElementKind::Line, UidRequest::Auto, None)
            .unwrap();
        assert_eq!(next.uid(), Uid::new(3));
    }

    #[test]
    fn failed_load_leaves_document_untouched() {
        let document = Document::new();
        let uid = committed_line(&document, Point3::origin(), Point3::new(2.0, 2.0, 0.0));

        let mut broken = TextBlock::root();
        broken
            .add_child("Line")
            .set_attribute("uid", 5)
            .set_attribute("elementType", "Line");
        broken.add_child("Spline").set_attribute("elementType", "Spline");

        assert!(document.load_block(&broken).is_err());
        assert_eq!(document.uids(), vec![uid]);
        assert_eq!(document.vertices().len(), 2);
    }

    #[test]
    fn bounds_cover_all_entities() {
        let document = Document::new();
        assert!(document.bounds().is_none());
        committed_line(&document, Point3::new(-1.0, 0.0, 0.0), Point3::new(4.0, 3.0, 0.0));
        let bounds = document.bounds().unwrap();
        assert_eq!(bounds.min(), Point3::new(-1.0, 0.0, 0.0));
        assert_eq!(bounds.max(), Point3::new(4.0, 3.0, 0.0));
    }
}
