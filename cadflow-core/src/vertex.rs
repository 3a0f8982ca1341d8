use std::collections::HashSet;

use parking_lot::RwLock;
use tracing::trace;

use crate::geometry::Point3;

/// 文档级共享顶点池。
///
/// 同值顶点只保存一份，索引一经分配即在文档生命周期内保持稳定（不做压缩）。
/// 越界访问会用原点顶点补齐到目标索引，而不是报错；实体依赖这一点预留顶点槽位，
/// 从文件恢复顶点索引时也依赖它。
#[derive(Debug, Default)]
pub struct VertexArena {
    slots: RwLock<Vec<Point3>>,
}

impl VertexArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vertices(vertices: Vec<Point3>) -> Self {
        Self {
            slots: RwLock::new(vertices),
        }
    }

    /// 返回与 `position` 精确相等的首个顶点索引；不存在时追加。
    pub fn add(&self, position: Point3) -> usize {
        let mut slots = self.slots.write();
        if let Some(index) = slots.iter().position(|vertex| *vertex == position) {
            return index;
        }
        slots.push(position);
        slots.len() - 1
    }

    pub fn get(&self, index: usize) -> Point3 {
        if let Some(vertex) = self.slots.read().get(index) {
            return *vertex;
        }
        let mut slots = self.slots.write();
        Self::grow(&mut slots, index);
        slots[index]
    }

    /// 在末尾预留一个原点槽位并返回其索引，不做去重。
    pub fn reserve(&self) -> usize {
        let mut slots = self.slots.write();
        let index = slots.len();
        Self::grow(&mut slots, index);
        index
    }

    /// 只读访问，不会扩容。
    #[inline]
    pub fn try_get(&self, index: usize) -> Option<Point3> {
        self.slots.read().get(index).copied()
    }

    pub fn set(&self, index: usize, position: Point3) {
        let mut slots = self.slots.write();
        Self::grow(&mut slots, index);
        slots[index] = position;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Point3> {
        self.slots.read().clone()
    }

    /// 整体替换顶点池内容，仅在整文档重新载入时使用。
    pub fn replace_all(&self, vertices: Vec<Point3>) {
        *self.slots.write() = vertices;
    }

    /// 用于鼠标吸附：按索引顺序返回第一个与 `point` 距离小于 `max_distance` 的顶点。
    pub fn first_within(
        &self,
        point: Point3,
        max_distance: f64,
        exclude: &HashSet<usize>,
    ) -> Option<(usize, Point3)> {
        let limit = max_distance * max_distance;
        self.slots
            .read()
            .iter()
            .enumerate()
            .filter(|(index, _)| !exclude.contains(index))
            .find(|(_, vertex)| vertex.distance_squared(point) < limit)
            .map(|(index, vertex)| (index, *vertex))
    }

    fn grow(slots: &mut Vec<Point3>, index: usize) {
        if slots.len() <= index {
            trace!(from = slots.len(), to = index + 1, "顶点池按需扩容");
            slots.resize(index + 1, Point3::origin());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_positions_share_one_slot() {
        let arena = VertexArena::new();
        let a = arena.add(Point3::new(1.0, 2.0, 3.0));
        let b = arena.add(Point3::new(4.0, 5.0, 6.0));
        let c = arena.add(Point3::new(1.0, 2.0, 3.0));

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn indices_stay_stable_across_insertions() {
        let arena = VertexArena::new();
        let first: Vec<usize> = (0..10)
            .map(|i| arena.add(Point3::new(i as f64, 0.0, 0.0)))
            .collect();
        for i in 10..50 {
            arena.add(Point3::new(i as f64, 1.0, 0.0));
        }
        for (i, index) in first.iter().enumerate() {
            assert_eq!(*index, i);
            assert_eq!(arena.get(*index), Point3::new(i as f64, 0.0, 0.0));
        }
    }

    #[test]
    fn dedup_has_no_tolerance() {
        let arena = VertexArena::new();
        let a = arena.add(Point3::new(0.1 + 0.2, 0.0, 0.0));
        let b = arena.add(Point3::new(0.3, 0.0, 0.0));
        assert_ne!(a, b);
    }

    #[test]
    fn out_of_range_access_grows_with_origin() {
        let arena = VertexArena::new();
        arena.add(Point3::new(7.0, 7.0, 7.0));

        assert_eq!(arena.get(3), Point3::origin());
        assert_eq!(arena.len(), 4);

        arena.set(6, Point3::new(1.0, 1.0, 1.0));
        assert_eq!(arena.len(), 7);
        assert_eq!(arena.get(6), Point3::new(1.0, 1.0, 1.0));
        assert_eq!(arena.try_get(10), None);
        assert_eq!(arena.len(), 7);
    }

    #[test]
    fn reserved_slots_are_distinct() {
        let arena = VertexArena::new();
        arena.add(Point3::origin());
        let a = arena.reserve();
        let b = arena.reserve();

        assert_eq!((a, b), (1, 2));
        assert_eq!(arena.get(b), Point3::origin());
        assert_eq!(arena.add(Point3::origin()), 0);
    }

    #[test]
    fn set_overwrites_in_place() {
        let arena = VertexArena::new();
        let index = arena.add(Point3::new(1.0, 0.0, 0.0));
        arena.set(index, Point3::new(2.0, 0.0, 0.0));
        assert_eq!(arena.get(index), Point3::new(2.0, 0.0, 0.0));
        assert_eq!(arena.add(Point3::new(2.0, 0.0, 0.0)), index);
    }

    #[test]
    fn first_within_respects_exclusions() {
        let arena = VertexArena::new();
        let near = arena.add(Point3::new(1.0, 1.0, 0.0));
        let other = arena.add(Point3::new(2.0, 2.0, 0.0));
        arena.add(Point3::new(100.0, 100.0, 0.0));

        let probe = Point3::new(1.5, 1.5, 0.0);
        assert_eq!(
            arena.first_within(probe, 10.0, &HashSet::new()).map(|(i, _)| i),
            Some(near)
        );

        let exclude: HashSet<usize> = [near].into_iter().collect();
        assert_eq!(
            arena.first_within(probe, 10.0, &exclude).map(|(i, _)| i),
            Some(other)
        );
        assert!(arena.first_within(Point3::new(50.0, 50.0, 0.0), 10.0, &HashSet::new()).is_none());
    }
}
