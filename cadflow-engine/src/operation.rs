use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cadflow_core::document::Document;
use cadflow_core::entity::{CadObject, ElementKind, OperationId, Uid, UidRequest};
use cadflow_core::geometry::{Point2, Point3};
use cadflow_core::vertex::VertexArena;
use crossbeam::channel::{Receiver, Sender, TryRecvError, select};
use tracing::trace;

use crate::errors::OperationFault;
use crate::input::{InputEvent, InputMask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationReturn {
    End,
    Cancel,
}

/// 可交互的多步操作，在独立的工作线程上执行。
pub trait Operation: Send {
    fn name(&self) -> &'static str;

    fn execute(&mut self, ctx: &mut OperationContext) -> Result<OperationReturn, OperationFault>;
}

/// 操作执行期间可用的上下文：文档、输入通道、取消信号与吸附设置。
pub struct OperationContext {
    id: OperationId,
    document: Arc<Document>,
    input: Receiver<InputEvent>,
    cancel: Receiver<()>,
    // 保持取消通道常开，句柄被丢弃时不会误判为取消
    _cancel_guard: Sender<()>,
    cancelled: bool,
    snapping: Arc<AtomicBool>,
    link_distance: f64,
    mouse_point: Point3,
}

impl OperationContext {
    pub(crate) fn new(
        id: OperationId,
        document: Arc<Document>,
        input: Receiver<InputEvent>,
        cancel: (Sender<()>, Receiver<()>),
        snapping: Arc<AtomicBool>,
        link_distance: f64,
    ) -> Self {
        Self {
            id,
            document,
            input,
            cancel: cancel.1,
            _cancel_guard: cancel.0,
            cancelled: false,
            snapping,
            link_distance,
            mouse_point: Point3::origin(),
        }
    }

    #[inline]
    pub fn id(&self) -> OperationId {
        self.id
    }

    #[inline]
    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// 在本操作的暂存区中创建实体。
    pub fn create_entity(&self, kind: ElementKind) -> Result<Uid, OperationFault> {
        let object = self
            .document
            .create_entity(kind, UidRequest::Auto, Some(self.id))?;
        Ok(object.uid())
    }

    /// 修改实体：优先查找本操作的暂存区，其次是文档实体表（会被访问记录捕获）。
    pub fn edit<R>(
        &self,
        uid: Uid,
        f: impl FnOnce(&mut CadObject, &VertexArena) -> R,
    ) -> Result<R, OperationFault> {
        let mut f = Some(f);
        if let Some(result) = self.document.with_staged(self.id, uid, |object, arena| {
            f.take().map(|f| f(object, arena))
        }) {
            return result.ok_or(OperationFault::MissingEntity(uid.get()));
        }
        let f = f.ok_or(OperationFault::MissingEntity(uid.get()))?;
        self.document
            .with_entity_mut(uid, f)
            .ok_or(OperationFault::MissingEntity(uid.get()))
    }

    /// 删除已提交的实体，删除会在操作结束时记为 `Deleted`。
    pub fn delete_entity(&self, uid: Uid) -> Option<CadObject> {
        self.document.delete_entity(uid)
    }

    /// 当前鼠标位置，开启吸附时已替换为吸附到的顶点。
    #[inline]
    pub fn mouse_point(&self) -> Point3 {
        self.mouse_point
    }

    #[inline]
    pub fn is_snapping(&self) -> bool {
        self.snapping.load(Ordering::Relaxed)
    }

    /// 阻塞等待一个符合 `mask` 的事件。
    ///
    /// Escape、取消信号或输入通道关闭都返回 [`OperationFault::Cancelled`]；
    /// 不符合的事件被丢弃，但仍会更新鼠标位置。已排队的输入先于取消信号处理。
    /// 空掩码退化为 [`OperationContext::poll_input`]。
    pub fn wait_input(&mut self, mask: InputMask) -> Result<InputEvent, OperationFault> {
        if mask.is_empty() {
            return self.poll_input()?.ok_or(OperationFault::NoInput);
        }
        loop {
            if self.cancelled {
                return Err(OperationFault::Cancelled);
            }
            let received = match self.input.try_recv() {
                Ok(event) => Some(event),
                Err(TryRecvError::Disconnected) => None,
                Err(TryRecvError::Empty) => select! {
                    recv(self.input) -> message => message.ok(),
                    recv(self.cancel) -> _ => None,
                },
            };
            let Some(event) = received else {
                self.cancelled = true;
                continue;
            };
            if event.is_escape() {
                self.cancelled = true;
                continue;
            }
            self.track(&event);
            if mask.contains(event.category()) {
                return Ok(event);
            }
            trace!(operation = self.id.get(), ?event, "忽略不关心的输入");
        }
    }

    /// 非阻塞地取出一个已排队的事件。
    pub fn poll_input(&mut self) -> Result<Option<InputEvent>, OperationFault> {
        if self.cancelled {
            return Err(OperationFault::Cancelled);
        }
        match self.input.try_recv() {
            Ok(event) if event.is_escape() => {
                self.cancelled = true;
                Err(OperationFault::Cancelled)
            }
            Ok(event) => {
                self.track(&event);
                Ok(Some(event))
            }
            Err(TryRecvError::Empty) if self.cancel.try_recv().is_ok() => {
                self.cancelled = true;
                Err(OperationFault::Cancelled)
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                self.cancelled = true;
                Err(OperationFault::Cancelled)
            }
        }
    }

    /// 丢弃至多 `count` 个已排队的事件，返回实际丢弃的数量。
    pub fn skip_input(&mut self, count: usize) -> usize {
        let mut skipped = 0;
        while skipped < count {
            match self.input.try_recv() {
                Ok(event) => {
                    self.track(&event);
                    skipped += 1;
                }
                Err(_) => break,
            }
        }
        skipped
    }

    fn track(&mut self, event: &InputEvent) {
        if let Some(position) = event.position() {
            self.mouse_point = self.resolve(position);
        }
    }

    fn resolve(&self, position: Point2) -> Point3 {
        let point = position.to_point3();
        if !self.is_snapping() {
            return point;
        }
        let exclude = self
            .document
            .staging_area(self.id)
            .map(|area| area.vertex_indices())
            .unwrap_or_default();
        match self
            .document
            .vertices()
            .first_within(point, self.link_distance, &exclude)
        {
            Some((index, vertex)) => {
                trace!(operation = self.id.get(), index, "鼠标吸附到顶点");
                vertex
            }
            None => point,
        }
    }
}
