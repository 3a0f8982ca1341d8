use cadflow_core::entity::ElementKind;
use cadflow_core::geometry::Point3;
use tracing::{debug, trace};

use crate::errors::OperationFault;
use crate::input::{InputEvent, InputMask, MouseButton};
use crate::operation::{Operation, OperationContext, OperationReturn};

/// 等待左键确定第一个点；在此之前右键等同于取消。
fn first_point(ctx: &mut OperationContext) -> Result<Option<Point3>, OperationFault> {
    loop {
        let event = ctx.wait_input(InputMask::MOUSE_CLICK)?;
        if event.is_click(MouseButton::Left) {
            return Ok(Some(ctx.mouse_point()));
        }
        if event.is_click(MouseButton::Right) {
            return Ok(None);
        }
    }
}

fn is_left_click(event: &InputEvent) -> bool {
    event.is_click(MouseButton::Left)
}

/// 两次左键定义一条线段。
#[derive(Debug, Default)]
pub struct CreateLine;

impl CreateLine {
    pub const NAME: &'static str = "Create Line";
}

impl Operation for CreateLine {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn execute(&mut self, ctx: &mut OperationContext) -> Result<OperationReturn, OperationFault> {
        let Some(start) = first_point(ctx)? else {
            return Ok(OperationReturn::Cancel);
        };
        let uid = ctx.create_entity(ElementKind::Line)?;
        ctx.edit(uid, |object, arena| {
            if let Some(mut line) = object.as_line(arena) {
                line.set_start(start);
            }
        })?;
        debug!(operation = ctx.id().get(), uid = uid.get(), x = start.x(), y = start.y(), "线段起点");

        loop {
            let event = ctx.wait_input(InputMask::MOUSE)?;
            let point = ctx.mouse_point();
            if !is_left_click(&event) {
                trace!(operation = ctx.id().get(), x = point.x(), y = point.y(), "线段终点预览");
                continue;
            }
            ctx.edit(uid, |object, arena| {
                if let Some(mut line) = object.as_line(arena) {
                    line.set_end(point);
                }
            })?;
            return Ok(OperationReturn::End);
        }
    }
}

/// 左键确定圆心，鼠标位置决定半径，第二次左键完成。
#[derive(Debug, Default)]
pub struct CreateCircle;

impl CreateCircle {
    pub const NAME: &'static str = "Create Circle";
}

impl Operation for CreateCircle {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn execute(&mut self, ctx: &mut OperationContext) -> Result<OperationReturn, OperationFault> {
        let Some(center) = first_point(ctx)? else {
            return Ok(OperationReturn::Cancel);
        };
        let uid = ctx.create_entity(ElementKind::Circle)?;
        ctx.edit(uid, |object, arena| {
            if let Some(mut circle) = object.as_circle(arena) {
                circle.set_center(center);
            }
        })?;

        loop {
            let event = ctx.wait_input(InputMask::MOUSE)?;
            let radius = center.distance(ctx.mouse_point());
            ctx.edit(uid, |object, arena| {
                if let Some(mut circle) = object.as_circle(arena) {
                    circle.set_radius(radius);
                }
            })?;
            if is_left_click(&event) {
                debug!(operation = ctx.id().get(), uid = uid.get(), radius, "圆创建完成");
                return Ok(OperationReturn::End);
            }
        }
    }
}

/// 依次点击圆心、起点（确定半径与起始角）和终点方向。
#[derive(Debug, Default)]
pub struct CreateArc;

impl CreateArc {
    pub const NAME: &'static str = "Create Arc";
}

impl Operation for CreateArc {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn execute(&mut self, ctx: &mut OperationContext) -> Result<OperationReturn, OperationFault> {
        let Some(center) = first_point(ctx)? else {
            return Ok(OperationReturn::Cancel);
        };
        let uid = ctx.create_entity(ElementKind::Arc)?;
        ctx.edit(uid, |object, arena| {
            if let Some(mut arc) = object.as_arc(arena) {
                arc.set_center(center);
            }
        })?;

        loop {
            let event = ctx.wait_input(InputMask::MOUSE)?;
            let pointer = ctx.mouse_point();
            let radius = center.distance(pointer);
            let angle = center.angle_to(pointer);
            ctx.edit(uid, |object, arena| {
                if let Some(mut arc) = object.as_arc(arena) {
                    arc.set_radius(radius);
                    arc.set_start_angle(angle);
                    arc.set_end_angle(angle);
                }
            })?;
            if is_left_click(&event) {
                break;
            }
        }

        loop {
            let event = ctx.wait_input(InputMask::MOUSE)?;
            let angle = center.angle_to(ctx.mouse_point());
            ctx.edit(uid, |object, arena| {
                if let Some(mut arc) = object.as_arc(arena) {
                    arc.set_end_angle(angle);
                }
            })?;
            if is_left_click(&event) {
                return Ok(OperationReturn::End);
            }
        }
    }
}
