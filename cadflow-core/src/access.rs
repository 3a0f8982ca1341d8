use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use parking_lot::Mutex;

/// 一次记录窗口的结果：被读写过的键（按首次访问排序、去重），以及窗口内被移除的值。
#[derive(Debug, Clone)]
pub struct AccessLog<K, V> {
    pub touched: Vec<K>,
    pub removed: HashMap<K, V>,
}

impl<K, V> Default for AccessLog<K, V> {
    fn default() -> Self {
        Self {
            touched: Vec::new(),
            removed: HashMap::new(),
        }
    }
}

#[derive(Debug)]
struct Inner<K, V> {
    map: HashMap<K, V>,
    recording: bool,
    log: Vec<K>,
    removed: HashMap<K, V>,
}

/// 带访问记录开关的键值表。
///
/// 所有访问都经过同一把互斥锁；开启记录后，成功的 `get`/`try_get`/`with_mut`/
/// `insert`/`add`/`remove` 会把键写入日志，操作结束时据此得知被触及的实体集合。
#[derive(Debug)]
pub struct AccessTracker<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> Default for AccessTracker<K, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                recording: false,
                log: Vec::new(),
                removed: HashMap::new(),
            }),
        }
    }
}

impl<K, V> AccessTracker<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// 清空旧日志并开始记录。
    pub fn start_recording(&self) {
        let mut inner = self.inner.lock();
        inner.log.clear();
        inner.removed.clear();
        inner.recording = true;
    }

    pub fn stop_recording(&self) -> AccessLog<K, V> {
        let mut inner = self.inner.lock();
        inner.recording = false;
        let log = std::mem::take(&mut inner.log);
        let removed = std::mem::take(&mut inner.removed);

        let mut seen = HashSet::with_capacity(log.len());
        let touched = log
            .into_iter()
            .filter(|key| seen.insert(key.clone()))
            .collect();
        AccessLog { touched, removed }
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.inner.lock().recording
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.map.get(key).cloned()?;
        inner.record(key);
        Some(value)
    }

    /// 与 `get` 相同，保留该名称以对应调用方“试探读取”的语义。
    #[inline]
    pub fn try_get(&self, key: &K) -> Option<V> {
        self.get(key)
    }

    /// 在锁内原位修改值。
    pub fn with_mut<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        let result = f(inner.map.get_mut(key)?);
        inner.record(key);
        Some(result)
    }

    /// 写入（覆盖）值，返回旧值。
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.record(&key);
        inner.map.insert(key, value)
    }

    /// 仅当键不存在时写入；已存在时原样返回值。
    pub fn add(&self, key: K, value: V) -> Result<(), V> {
        let mut inner = self.inner.lock();
        if inner.map.contains_key(&key) {
            return Err(value);
        }
        inner.record(&key);
        inner.map.insert(key, value);
        Ok(())
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.map.remove(key)?;
        if inner.recording {
            inner.log.push(key.clone());
            inner
                .removed
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        Some(value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().map.contains_key(key)
    }

    /// 不记录的只读访问，供界面刷新、保存等旁路使用。
    pub fn peek<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.inner.lock().map.get(key).map(f)
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().map.keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.inner.lock().map.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    /// 在锁内整体替换内容，不记录。
    pub fn replace_all(&self, entries: impl IntoIterator<Item = (K, V)>) {
        let mut inner = self.inner.lock();
        inner.map = entries.into_iter().collect();
    }
}

impl<K: Clone, V> Inner<K, V> {
    #[inline]
    fn record(&mut self, key: &K) {
        if self.recording {
            self.log.push(key.clone());
        }
    }
}
