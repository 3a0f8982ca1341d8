use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::block::TextBlock;
use crate::document::DocumentError;
use crate::entity::{ElementKind, Uid};

/// 实体相对一次变更前后快照的存续状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LifeStatus {
    #[default]
    Existed,
    Created,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    OperationSucceeded,
    PropertyChanged,
}

/// 单个实体在一条历史记录中的快照。
///
/// `state` 为变更后的保存结果；`before` 为变更前的保存结果，仅当实体在变更前已存在时给出。
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub uid: Uid,
    pub kind: ElementKind,
    pub status: LifeStatus,
    pub state: TextBlock,
    pub before: Option<TextBlock>,
}

impl HistoryEntry {
    /// 撤销时应恢复到的状态。
    #[inline]
    pub fn undo_state(&self) -> &TextBlock {
        self.before.as_ref().unwrap_or(&self.state)
    }
}

/// 一次已提交操作或属性修改的不可变记录。
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    kind: RecordKind,
    entries: Vec<HistoryEntry>,
}

impl HistoryRecord {
    pub fn new(kind: RecordKind, entries: Vec<HistoryEntry>) -> Self {
        Self { kind, entries }
    }

    #[inline]
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    #[inline]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn status_of(&self, uid: Uid) -> Option<LifeStatus> {
        self.entries
            .iter()
            .find(|entry| entry.uid == uid)
            .map(|entry| entry.status)
    }
}

impl fmt::Display for HistoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        for entry in &self.entries {
            write!(f, " [{}, {}: {:?}]", entry.kind, entry.uid, entry.status)?;
        }
        Ok(())
    }
}

/// 历史回放作用的对象，由文档实现。
pub trait HistoryTarget {
    /// 以原 UID 重建实体并直接提交。
    fn restore_entity(&self, kind: ElementKind, uid: Uid, state: &TextBlock)
    -> Result<(), DocumentError>;

    /// 原位重新载入已存在实体的字段。
    fn reload_entity(&self, uid: Uid, state: &TextBlock) -> Result<(), DocumentError>;

    fn remove_entity(&self, uid: Uid);
}

/// 线性撤销栈：`cursor` 之前的记录可撤销，之后的可重做。
#[derive(Debug, Default)]
pub struct HistoryManager {
    records: Vec<HistoryRecord>,
    cursor: usize,
    max_records: usize,
}

impl HistoryManager {
    /// `max_records` 为 0 表示不限制。
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Vec::new(),
            cursor: 0,
            max_records,
        }
    }

    pub fn set_max_records(&mut self, max_records: usize) {
        self.max_records = max_records;
    }

    /// 丢弃游标之后的记录并追加新记录。
    pub fn add_undo(&mut self, record: HistoryRecord) {
        self.records.truncate(self.cursor);
        debug!(level = self.cursor, record = %record, "追加历史记录");
        self.records.push(record);
        self.cursor += 1;

        if self.max_records > 0 && self.records.len() > self.max_records {
            let excess = self.records.len() - self.max_records;
            self.records.drain(..excess);
            self.cursor -= excess;
        }
    }

    pub fn undo(&mut self, target: &dyn HistoryTarget) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        let record = &self.records[self.cursor];
        for entry in record.entries() {
            let result = match entry.status {
                LifeStatus::Deleted => target.restore_entity(entry.kind, entry.uid, entry.undo_state()),
                LifeStatus::Existed => target.reload_entity(entry.uid, entry.undo_state()),
                LifeStatus::Created => {
                    target.remove_entity(entry.uid);
                    Ok(())
                }
            };
            if let Err(err) = result {
                warn!(uid = entry.uid.get(), status = ?entry.status, error = %err, "撤销时回放实体失败");
            }
        }
        true
    }

    pub fn redo(&mut self, target: &dyn HistoryTarget) -> bool {
        if self.cursor >= self.records.len() {
            return false;
        }
        let record = &self.records[self.cursor];
        for entry in record.entries() {
            let result = match entry.status {
                LifeStatus::Created => target.restore_entity(entry.kind, entry.uid, &entry.state),
                LifeStatus::Existed => target.reload_entity(entry.uid, &entry.state),
                LifeStatus::Deleted => {
                    target.remove_entity(entry.uid);
                    Ok(())
                }
            };
            if let Err(err) = result {
                warn!(uid = entry.uid.get(), status = ?entry.status, error = %err, "重做时回放实体失败");
            }
        }
        self.cursor += 1;
        true
    }

    #[inline]
    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    #[inline]
    pub fn can_redo(&self) -> bool {
        self.cursor < self.records.len()
    }

    /// 当前游标位置。
    #[inline]
    pub fn level(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.cursor = 0;
    }
}
