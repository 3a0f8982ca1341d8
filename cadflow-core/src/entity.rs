use std::fmt;
use std::str::FromStr;

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::block::TextBlock;
use crate::geometry::{Bounds3, Point3, Transform, arc_bounds};
use crate::vertex::VertexArena;

/// 实体唯一标识，在单个文档内单调分配且不复用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(u64);

impl Uid {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 交互式操作的标识，实体用它标记自己所在的暂存区。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(u64);

impl OperationId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 创建实体时的 UID 请求：自动分配或沿用指定值（历史回放时使用）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidRequest {
    Auto,
    Fixed(Uid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Line,
    Circle,
    Arc,
}

impl ElementKind {
    pub const ALL: [ElementKind; 3] = [ElementKind::Line, ElementKind::Circle, ElementKind::Arc];

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Line => "Line",
            ElementKind::Circle => "Circle",
            ElementKind::Arc => "Arc",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// 该类型固定占用的顶点槽位数。
    pub fn vertex_arity(self) -> usize {
        match self {
            ElementKind::Line => 2,
            ElementKind::Circle | ElementKind::Arc => 1,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ElementKind {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| EntityError::UnknownKind(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CircleShape {
    pub radius: f64,
}

/// 圆弧以圆心、半径及起止角描述，角度为弧度，逆时针方向。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ArcShape {
    pub radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
}

/// 各类型特有的标量字段。顶点位置不在这里，统一由顶点池保存。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Line,
    Circle(CircleShape),
    Arc(ArcShape),
}

impl Shape {
    pub fn empty(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Line => Shape::Line,
            ElementKind::Circle => Shape::Circle(CircleShape::default()),
            ElementKind::Arc => Shape::Arc(ArcShape::default()),
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Shape::Line => ElementKind::Line,
            Shape::Circle(_) => ElementKind::Circle,
            Shape::Arc(_) => ElementKind::Arc,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EntityError {
    #[error("unknown element type `{0}`")]
    UnknownKind(String),
    #[error("block `{block}` is missing attribute `{attribute}`")]
    MissingAttribute { block: String, attribute: &'static str },
    #[error("invalid uid `{0}`")]
    InvalidUid(String),
    #[error("element type mismatch: expected {expected}, found `{found}`")]
    KindMismatch { expected: ElementKind, found: String },
    #[error("invalid vertex entry for entity {uid}: {message}")]
    InvalidVertex { uid: Uid, message: String },
}

/// 文档中的几何实体。
///
/// 顶点以索引引用文档的 [`VertexArena`]；`owner` 只是暂存区的标记，
/// 通过文档的暂存表解析，不持有操作本身。
#[derive(Debug, Clone, PartialEq)]
pub struct CadObject {
    uid: Uid,
    shape: Shape,
    vertex_indices: Vec<usize>,
    transform: Transform,
    owner: Option<OperationId>,
    post_created: bool,
}

impl CadObject {
    /// 未占用任何顶点槽位的实体，槽位由视图按需补齐或由 [`CadObject::reserve_slots`] 预留。
    pub fn new(uid: Uid, kind: ElementKind) -> Self {
        Self {
            uid,
            shape: Shape::empty(kind),
            vertex_indices: Vec::with_capacity(kind.vertex_arity()),
            transform: Transform::default(),
            owner: None,
            post_created: false,
        }
    }

    /// 从保存块重建实体：类型与 UID 必须存在，其余字段交给 [`CadObject::load`]。
    pub fn from_block(arena: &VertexArena, block: &TextBlock) -> Result<Self, EntityError> {
        let kind_name = block
            .attribute("elementType")
            .ok_or_else(|| EntityError::MissingAttribute {
                block: block.name().to_string(),
                attribute: "elementType",
            })?;
        let kind = ElementKind::from_str(kind_name)?;
        let raw_uid = block
            .attribute("uid")
            .ok_or_else(|| EntityError::MissingAttribute {
                block: block.name().to_string(),
                attribute: "uid",
            })?;
        let uid = raw_uid
            .trim()
            .parse::<u64>()
            .map(Uid::new)
            .map_err(|_| EntityError::InvalidUid(raw_uid.to_string()))?;

        let mut object = CadObject::new(uid, kind);
        object.load(arena, block)?;
        if object.vertex_indices.len() != kind.vertex_arity() {
            return Err(EntityError::InvalidVertex {
                uid,
                message: format!(
                    "{kind} needs {} vertices, found {}",
                    kind.vertex_arity(),
                    object.vertex_indices.len()
                ),
            });
        }
        Ok(object)
    }

    /// 为尚未占用的槽位各预留一个独立的原点顶点，使索引表长度等于类型的固定槽位数。
    pub fn reserve_slots(&mut self, arena: &VertexArena) {
        while self.vertex_indices.len() < self.kind().vertex_arity() {
            self.vertex_indices.push(arena.reserve());
        }
    }

    #[inline]
    pub fn uid(&self) -> Uid {
        self.uid
    }

    #[inline]
    pub fn kind(&self) -> ElementKind {
        self.shape.kind()
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[inline]
    pub fn vertex_indices(&self) -> &[usize] {
        &self.vertex_indices
    }

    #[inline]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    #[inline]
    pub fn owner(&self) -> Option<OperationId> {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: Option<OperationId>) {
        self.owner = owner;
    }

    /// 首次提交到文档后置位。
    #[inline]
    pub fn post_created(&self) -> bool {
        self.post_created
    }

    pub(crate) fn mark_post_created(&mut self) {
        self.post_created = true;
    }

    /// 读取槽位对应的顶点，不触发扩容。
    pub fn position(&self, arena: &VertexArena, slot: usize) -> Option<Point3> {
        self.vertex_indices
            .get(slot)
            .and_then(|index| arena.try_get(*index))
    }

    pub fn as_line<'a>(&'a mut self, arena: &'a VertexArena) -> Option<LineView<'a>> {
        match self.shape {
            Shape::Line => Some(LineView {
                slots: VertexSlots {
                    indices: &mut self.vertex_indices,
                    arena,
                },
            }),
            _ => None,
        }
    }

    pub fn as_circle<'a>(&'a mut self, arena: &'a VertexArena) -> Option<CircleView<'a>> {
        match &mut self.shape {
            Shape::Circle(shape) => Some(CircleView {
                slots: VertexSlots {
                    indices: &mut self.vertex_indices,
                    arena,
                },
                shape,
            }),
            _ => None,
        }
    }

    pub fn as_arc<'a>(&'a mut self, arena: &'a VertexArena) -> Option<ArcView<'a>> {
        match &mut self.shape {
            Shape::Arc(shape) => Some(ArcView {
                slots: VertexSlots {
                    indices: &mut self.vertex_indices,
                    arena,
                },
                shape,
            }),
            _ => None,
        }
    }

    /// 把实体写入 `block`：属性、位姿子块与顶点子块。
    pub fn save(&self, arena: &VertexArena, block: &mut TextBlock) {
        block
            .set_attribute("uid", self.uid)
            .set_attribute("elementType", self.kind().name());
        match &self.shape {
            Shape::Line => {}
            Shape::Circle(circle) => {
                block.set_attribute("radius", circle.radius);
            }
            Shape::Arc(arc) => {
                block
                    .set_attribute("radius", arc.radius)
                    .set_attribute("startAngle", arc.start_angle)
                    .set_attribute("endAngle", arc.end_angle);
            }
        }

        let position = self.transform.position;
        block
            .add_child("transformPosition")
            .set_attribute("x", position.x)
            .set_attribute("y", position.y)
            .set_attribute("z", position.z);
        let rotation = self.transform.rotation;
        block
            .add_child("transformRotation")
            .set_attribute("x", rotation.x)
            .set_attribute("y", rotation.y)
            .set_attribute("z", rotation.z)
            .set_attribute("w", rotation.w);

        let vertices = block.add_child("vertices");
        for index in &self.vertex_indices {
            let point = arena.get(*index);
            vertices
                .add_child("element")
                .set_attribute("index", index)
                .set_attribute("x", point.x())
                .set_attribute("y", point.y())
                .set_attribute("z", point.z());
        }
    }

    /// 以实体类型名作为块名的保存结果。
    pub fn to_block(&self, arena: &VertexArena) -> TextBlock {
        let mut block = TextBlock::new(self.kind().name());
        self.save(arena, &mut block);
        block
    }

    /// 从保存块恢复字段。UID 不会被修改；单个字段解析失败只记录警告并保留原值。
    pub fn load(&mut self, arena: &VertexArena, block: &TextBlock) -> Result<(), EntityError> {
        if let Some(found) = block.attribute("elementType") {
            if found != self.kind().name() {
                return Err(EntityError::KindMismatch {
                    expected: self.kind(),
                    found: found.to_string(),
                });
            }
        }

        let uid = self.uid;
        match &mut self.shape {
            Shape::Line => {}
            Shape::Circle(circle) => {
                read_f64(block, "radius", uid, &mut circle.radius);
            }
            Shape::Arc(arc) => {
                read_f64(block, "radius", uid, &mut arc.radius);
                read_f64(block, "startAngle", uid, &mut arc.start_angle);
                read_f64(block, "endAngle", uid, &mut arc.end_angle);
            }
        }

        if let Some(child) = block.find_child("transformPosition") {
            let mut position = self.transform.position;
            read_f64(child, "x", uid, &mut position.x);
            read_f64(child, "y", uid, &mut position.y);
            read_f64(child, "z", uid, &mut position.z);
            self.transform.position = position;
        }
        if let Some(child) = block.find_child("transformRotation") {
            let current = self.transform.rotation;
            let (mut x, mut y, mut z, mut w) = (current.x, current.y, current.z, current.w);
            read_f64(child, "x", uid, &mut x);
            read_f64(child, "y", uid, &mut y);
            read_f64(child, "z", uid, &mut z);
            read_f64(child, "w", uid, &mut w);
            self.transform.rotation = DQuat::from_xyzw(x, y, z, w);
        }

        if let Some(vertices) = block.find_child("vertices") {
            let arity = self.kind().vertex_arity();
            if vertices.children().len() != arity {
                return Err(EntityError::InvalidVertex {
                    uid,
                    message: format!(
                        "{} needs {arity} vertices, found {}",
                        self.kind(),
                        vertices.children().len()
                    ),
                });
            }
            let mut indices = Vec::with_capacity(vertices.children().len());
            let mut positions = Vec::with_capacity(vertices.children().len());
            for element in vertices.children() {
                let raw = element
                    .attribute("index")
                    .ok_or_else(|| EntityError::InvalidVertex {
                        uid,
                        message: "missing `index`".to_string(),
                    })?;
                let index = raw
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| EntityError::InvalidVertex {
                        uid,
                        message: format!("invalid index `{raw}`"),
                    })?;
                let mut point = arena.try_get(index).unwrap_or_default().as_vec3();
                read_f64(element, "x", uid, &mut point.x);
                read_f64(element, "y", uid, &mut point.y);
                read_f64(element, "z", uid, &mut point.z);
                indices.push(index);
                positions.push(point);
            }
            // 结构校验全部通过后再写回顶点池
            for (index, position) in indices.iter().zip(positions) {
                arena.set(*index, Point3(position));
            }
            self.vertex_indices = indices;
        }
        Ok(())
    }

    /// 依据当前顶点计算包围盒；所需槽位缺失时返回 `None`。
    pub fn bounds(&self, arena: &VertexArena) -> Option<Bounds3> {
        let mut bounds = Bounds3::empty();
        match &self.shape {
            Shape::Line => {
                bounds.include_point(self.position(arena, 0)?);
                bounds.include_point(self.position(arena, 1)?);
            }
            Shape::Circle(circle) => {
                let center = self.position(arena, 0)?.as_vec3();
                let extent = DVec3::new(circle.radius.abs(), circle.radius.abs(), 0.0);
                bounds.include_point(Point3(center - extent));
                bounds.include_point(Point3(center + extent));
            }
            Shape::Arc(arc) => {
                let center = self.position(arena, 0)?;
                bounds = arc_bounds(center, arc.radius, arc.start_angle, arc.end_angle);
            }
        }
        Some(bounds)
    }
}

impl fmt::Display for CadObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.kind().name(), self.uid)
    }
}

fn read_f64(block: &TextBlock, key: &'static str, uid: Uid, target: &mut f64) {
    let Some(raw) = block.attribute(key) else {
        return;
    };
    match raw.trim().parse::<f64>() {
        Ok(value) => *target = value,
        Err(err) => {
            warn!(uid = uid.get(), field = key, value = raw, error = %err, "字段解析失败，保留原值");
        }
    }
}

/// 实体顶点索引表与顶点池的组合借用。
///
/// 读取缺失槽位时以原点顶点补齐索引表；写入缺失槽位时先按去重规则追加，
/// 随后再原位覆盖顶点池中的对应位置。
pub struct VertexSlots<'a> {
    indices: &'a mut Vec<usize>,
    arena: &'a VertexArena,
}

impl VertexSlots<'_> {
    pub fn get(&mut self, slot: usize) -> Point3 {
        while self.indices.len() <= slot {
            let index = self.arena.add(Point3::origin());
            self.indices.push(index);
        }
        self.arena.get(self.indices[slot])
    }

    pub fn set(&mut self, slot: usize, position: Point3) {
        while self.indices.len() <= slot {
            let index = self.arena.add(position);
            self.indices.push(index);
        }
        self.arena.set(self.indices[slot], position);
    }
}

pub struct LineView<'a> {
    slots: VertexSlots<'a>,
}

impl LineView<'_> {
    pub fn start(&mut self) -> Point3 {
        self.slots.get(0)
    }

    pub fn set_start(&mut self, position: Point3) {
        self.slots.set(0, position);
    }

    pub fn end(&mut self) -> Point3 {
        self.slots.get(1)
    }

    pub fn set_end(&mut self, position: Point3) {
        self.slots.set(1, position);
    }
}

pub struct CircleView<'a> {
    slots: VertexSlots<'a>,
    shape: &'a mut CircleShape,
}

impl CircleView<'_> {
    pub fn center(&mut self) -> Point3 {
        self.slots.get(0)
    }

    pub fn set_center(&mut self, position: Point3) {
        self.slots.set(0, position);
    }

    pub fn radius(&self) -> f64 {
        self.shape.radius
    }

    pub fn set_radius(&mut self, radius: f64) {
        self.shape.radius = radius;
    }
}

pub struct ArcView<'a> {
    slots: VertexSlots<'a>,
    shape: &'a mut ArcShape,
}

impl ArcView<'_> {
    pub fn center(&mut self) -> Point3 {
        self.slots.get(0)
    }

    pub fn set_center(&mut self, position: Point3) {
        self.slots.set(0, position);
    }

    pub fn radius(&self) -> f64 {
        self.shape.radius
    }

    pub fn set_radius(&mut self, radius: f64) {
        self.shape.radius = radius;
    }

    pub fn start_angle(&self) -> f64 {
        self.shape.start_angle
    }

    pub fn set_start_angle(&mut self, angle: f64) {
        self.shape.start_angle = angle;
    }

    pub fn end_angle(&self) -> f64 {
        self.shape.end_angle
    }

    pub fn set_end_angle(&mut self, angle: f64) {
        self.shape.end_angle = angle;
    }

    pub fn start_point(&mut self) -> Point3 {
        let radius = self.shape.radius;
        let angle = self.shape.start_angle;
        self.center().polar_offset(radius, angle)
    }

    pub fn end_point(&mut self) -> Point3 {
        let radius = self.shape.radius;
        let angle = self.shape.end_angle;
        self.center().polar_offset(radius, angle)
    }
}
