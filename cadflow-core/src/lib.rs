pub mod access;
pub mod block;
pub mod document;
pub mod entity;
pub mod history;
pub mod vertex;

pub mod geometry {
    use std::f64::consts::{FRAC_PI_2, PI, TAU};

    use glam::{DQuat, DVec2, DVec3};
    use serde::{Deserialize, Serialize};

    /// 二维点，用于描述工作平面上的输入坐标。
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        /// 投影到 z = 0 的工作平面。
        #[inline]
        pub fn to_point3(self) -> Point3 {
            Point3::new(self.0.x, self.0.y, 0.0)
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 三维点，顶点池中的存储单元。相等性按数值精确比较。
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
    pub struct Point3(pub DVec3);

    impl Point3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn origin() -> Self {
            Self(DVec3::ZERO)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn z(self) -> f64 {
            self.0.z
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }

        #[inline]
        pub fn distance_squared(self, other: Point3) -> f64 {
            self.0.distance_squared(other.0)
        }

        #[inline]
        pub fn distance(self, other: Point3) -> f64 {
            self.0.distance(other.0)
        }

        /// 以 XY 平面上的极坐标偏移得到新点，z 保持不变。
        #[inline]
        pub fn polar_offset(self, radius: f64, angle: f64) -> Self {
            Self(self.0 + DVec3::new(radius * angle.cos(), radius * angle.sin(), 0.0))
        }

        /// XY 平面上从 `self` 指向 `other` 的方位角（弧度）。
        #[inline]
        pub fn angle_to(self, other: Point3) -> f64 {
            (other.0.y - self.0.y).atan2(other.0.x - self.0.x)
        }
    }

    impl From<DVec3> for Point3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    /// 实体上携带的位姿，核心层只负责保存与恢复。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Transform {
        pub position: DVec3,
        pub rotation: DQuat,
    }

    impl Default for Transform {
        fn default() -> Self {
            Self {
                position: DVec3::ZERO,
                rotation: DQuat::IDENTITY,
            }
        }
    }

    /// 轴对齐包围盒。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds3 {
        min: Point3,
        max: Point3,
    }

    impl Bounds3 {
        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
                max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y() || self.min.z() > self.max.z()
        }

        #[inline]
        pub fn min(&self) -> Point3 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point3 {
            self.max
        }

        pub fn include_point(&mut self, point: Point3) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            self.min = Point3(self.min.as_vec3().min(point.as_vec3()));
            self.max = Point3(self.max.as_vec3().max(point.as_vec3()));
        }

        pub fn include_bounds(&mut self, other: &Bounds3) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        #[inline]
        pub fn center(&self) -> Point3 {
            debug_assert!(!self.is_empty());
            Point3((self.min.as_vec3() + self.max.as_vec3()) * 0.5)
        }
    }

    #[inline]
    pub fn normalize_angle(angle: f64) -> f64 {
        angle.rem_euclid(TAU)
    }

    /// 将起止角规范为 `start <= end`，首尾重合视为整圆。
    pub fn canonical_interval(start: f64, end: f64) -> (f64, f64) {
        let start = normalize_angle(start);
        let mut end = normalize_angle(end);
        if (end - start).abs() < 1e-9 {
            end = start + TAU;
        } else if end < start {
            end += TAU;
        }
        (start, end)
    }

    /// 逆时针圆弧的包围盒：端点加上落在扫掠范围内的象限点。
    pub fn arc_bounds(center: Point3, radius: f64, start_angle: f64, end_angle: f64) -> Bounds3 {
        let mut bounds = Bounds3::empty();
        let radius = radius.abs();
        if radius <= f64::EPSILON {
            bounds.include_point(center);
            return bounds;
        }

        let (start, end) = canonical_interval(start_angle, end_angle);
        bounds.include_point(center.polar_offset(radius, start));
        bounds.include_point(center.polar_offset(radius, end));

        const QUADRANTS: [f64; 4] = [0.0, FRAC_PI_2, PI, FRAC_PI_2 * 3.0];
        for base in QUADRANTS {
            let mut candidate = base;
            while candidate < start {
                candidate += TAU;
            }
            if candidate <= end {
                bounds.include_point(center.polar_offset(radius, candidate));
            }
        }
        bounds
    }

}

pub mod prelude {
    pub use crate::access::{AccessLog, AccessTracker};
    pub use crate::block::TextBlock;
    pub use crate::document::{Document, DocumentError, DocumentId, DocumentObserver, StagingArea};
    pub use crate::entity::{
        ArcView, CadObject, CircleView, ElementKind, EntityError, LineView, OperationId, Shape, Uid,
        UidRequest,
    };
    pub use crate::geometry::{Bounds3, Point2, Point3, Transform};
    pub use crate::history::{
        HistoryEntry, HistoryManager, HistoryRecord, HistoryTarget, LifeStatus, RecordKind,
    };
    pub use crate::vertex::VertexArena;
}
