use std::thread;
use std::time::{Duration, Instant};

use cadflow_core::document::Document;
use cadflow_core::entity::{ElementKind, Uid, UidRequest};
use cadflow_core::geometry::Point3;
use cadflow_engine::errors::OperationFault;
use cadflow_engine::input::{InputEvent, KeyCode, MouseButton};
use cadflow_engine::{
    EngineSettings, Operation, OperationContext, OperationEngine, OperationOutcome,
    OperationRegistry, OperationReturn,
};
use cadflow_core::geometry::Point2;

fn engine() -> OperationEngine {
    let mut engine = OperationEngine::new(OperationRegistry::with_defaults(), EngineSettings::default());
    engine.create_document();
    engine
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "等待条件超时");
        thread::sleep(Duration::from_millis(2));
    }
}

fn line_points(document: &Document, uid: Uid) -> (Point3, Point3) {
    let line = document.peek_entity(uid).expect("实体应存在");
    (
        line.position(document.vertices(), 0).expect("起点"),
        line.position(document.vertices(), 1).expect("终点"),
    )
}

#[test]
fn create_line_then_undo_and_redo() {
    let engine = engine();
    let handle = engine.begin_operation("Create Line").expect("操作应启动");
    engine.dispatch_input(InputEvent::click(0.0, 0.0));
    engine.dispatch_input(InputEvent::click(10.0, 10.0));
    assert_eq!(handle.wait(), OperationOutcome::Committed { record_created: true });

    let document = engine.active_document().unwrap();
    assert_eq!(document.uids(), vec![Uid::new(1)]);
    assert_eq!(
        line_points(&document, Uid::new(1)),
        (Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 0.0))
    );
    let committed = document.peek_entity(Uid::new(1)).unwrap();
    assert!(committed.post_created());
    assert_eq!(committed.owner(), None);

    assert!(engine.undo());
    assert!(document.is_empty());

    assert!(engine.redo());
    assert_eq!(document.uids(), vec![Uid::new(1)]);
    assert_eq!(document.peek_entity(Uid::new(1)).unwrap(), committed);
}

#[test]
fn moves_before_the_final_click_do_not_touch_the_arena() {
    let engine = engine();
    let handle = engine.begin_operation("Create Line").unwrap();
    engine.dispatch_input(InputEvent::click(0.0, 0.0));
    engine.dispatch_input(InputEvent::mouse_move(0.0, 0.0));
    engine.dispatch_input(InputEvent::mouse_move(4.0, 4.0));
    engine.dispatch_input(InputEvent::click(6.0, 8.0));
    assert!(matches!(handle.wait(), OperationOutcome::Committed { .. }));

    let document = engine.active_document().unwrap();
    assert_eq!(
        line_points(&document, Uid::new(1)),
        (Point3::new(0.0, 0.0, 0.0), Point3::new(6.0, 8.0, 0.0))
    );
    assert_eq!(document.vertices().len(), 2);
}

#[test]
fn staged_entity_is_invisible_until_commit() {
    let engine = engine();
    let document = engine.active_document().unwrap();
    let handle = engine.begin_operation("Create Line").unwrap();
    engine.dispatch_input(InputEvent::click(1.0, 1.0));
    wait_until(|| document.staged_len(handle.id()) == 1);

    assert!(document.is_staged(Uid::new(1)));
    assert!(!document.contains(Uid::new(1)));
    assert!(document.is_empty());

    engine.dispatch_input(InputEvent::click(2.0, 2.0));
    handle.wait();
    assert!(!document.is_staged(Uid::new(1)));
    assert!(document.contains(Uid::new(1)));
}

#[test]
fn escape_discards_staged_entities_without_history() {
    let engine = engine();
    let document = engine.active_document().unwrap();
    document
        .create_entity(ElementKind::Line, UidRequest::Auto, None)
        .unwrap();
    let before = document.uids();

    let handle = engine.begin_operation("Create Circle").unwrap();
    let operation = handle.id();
    engine.dispatch_input(InputEvent::click(5.0, 5.0));
    engine.dispatch_input(InputEvent::mouse_move(7.0, 5.0));
    engine.dispatch_input(InputEvent::Key(KeyCode::Escape));
    assert_eq!(handle.wait(), OperationOutcome::Cancelled);

    assert_eq!(document.uids(), before);
    assert_eq!(document.history_len(), 0);
    assert_eq!(document.staged_len(operation), 0);
    assert!(document.staging_area(operation).is_none());
    assert_eq!(engine.active_operation_count(), 0);
}

#[test]
fn right_click_before_first_point_cancels() {
    let engine = engine();
    let handle = engine.begin_operation("Create Arc").unwrap();
    engine.dispatch_input(InputEvent::MouseClick {
        position: Point2::new(0.0, 0.0),
        button: MouseButton::Right,
    });
    assert_eq!(handle.wait(), OperationOutcome::Cancelled);
    assert!(engine.active_document().unwrap().is_empty());
}

#[test]
fn cancel_signal_stops_a_waiting_operation() {
    let engine = engine();
    let handle = engine.begin_operation("Create Line").unwrap();
    engine.dispatch_input(InputEvent::click(0.0, 0.0));
    handle.cancel();
    assert_eq!(handle.wait(), OperationOutcome::Cancelled);

    let document = engine.active_document().unwrap();
    assert!(document.is_empty());
    assert!(!document.can_undo());
}

#[test]
fn switching_documents_stops_delivery_to_the_old_one() {
    let mut engine = engine();
    let first = engine.active_document().unwrap();
    let handle = engine.begin_operation("Create Line").unwrap();

    let second_id = engine.create_document();
    engine.dispatch_input(InputEvent::click(100.0, 100.0));
    engine.dispatch_input(InputEvent::click(200.0, 200.0));

    assert!(handle.send(InputEvent::click(1.0, 0.0)));
    assert!(handle.send(InputEvent::click(2.0, 0.0)));
    assert!(matches!(handle.wait(), OperationOutcome::Committed { .. }));

    assert_eq!(
        line_points(&first, Uid::new(1)),
        (Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0))
    );
    assert!(engine.document(second_id).unwrap().is_empty());
}

#[test]
fn snapping_reuses_existing_vertices() {
    let settings = EngineSettings {
        vertex_snapping: true,
        ..EngineSettings::default()
    };
    let mut engine = OperationEngine::new(OperationRegistry::with_defaults(), settings);
    engine.create_document();
    let document = engine.active_document().unwrap();

    let first = engine.begin_operation("Create Line").unwrap();
    engine.dispatch_input(InputEvent::click(0.0, 0.0));
    engine.dispatch_input(InputEvent::click(30.0, 30.0));
    first.wait();

    let second = engine.begin_operation("Create Line").unwrap();
    engine.dispatch_input(InputEvent::click(32.0, 31.0));
    engine.dispatch_input(InputEvent::click(80.0, 10.0));
    second.wait();

    let (start, end) = line_points(&document, Uid::new(2));
    assert_eq!(start, Point3::new(30.0, 30.0, 0.0));
    assert_eq!(end, Point3::new(80.0, 10.0, 0.0));
    let shared = document.peek_entity(Uid::new(1)).unwrap().vertex_indices()[1];
    assert_eq!(document.peek_entity(Uid::new(2)).unwrap().vertex_indices()[0], shared);
}

struct Failing;

impl Operation for Failing {
    fn name(&self) -> &'static str {
        "Failing"
    }

    fn execute(&mut self, ctx: &mut OperationContext) -> Result<OperationReturn, OperationFault> {
        ctx.create_entity(ElementKind::Line)?;
        Err(OperationFault::Failed("broken input".to_string()))
    }
}

struct Panicking;

impl Operation for Panicking {
    fn name(&self) -> &'static str {
        "Panicking"
    }

    fn execute(&mut self, ctx: &mut OperationContext) -> Result<OperationReturn, OperationFault> {
        ctx.create_entity(ElementKind::Circle)?;
        panic!("operation exploded");
    }
}

#[test]
fn faults_and_panics_are_treated_as_cancellation() {
    let mut registry = OperationRegistry::with_defaults();
    registry.register("Failing", || Box::new(Failing) as Box<dyn Operation>);
    registry.register("Panicking", || Box::new(Panicking) as Box<dyn Operation>);
    let mut engine = OperationEngine::new(registry, EngineSettings::default());
    engine.create_document();
    let document = engine.active_document().unwrap();

    let outcome = engine.begin_operation("Failing").unwrap().wait();
    assert_eq!(outcome, OperationOutcome::Faulted("broken input".to_string()));

    let outcome = engine.begin_operation("Panicking").unwrap().wait();
    assert_eq!(outcome, OperationOutcome::Faulted("operation exploded".to_string()));

    assert!(document.is_empty());
    assert_eq!(document.history_len(), 0);
    assert!(!document.is_staged(Uid::new(1)));
    assert!(!document.is_staged(Uid::new(2)));
}

#[derive(Clone, Copy, Debug)]
enum Ending {
    Cancel,
    Fault,
    Panic,
}

/// 删除一条线段、移动另一条线段的终点并暂存一个圆，随后放弃。
struct Abandon {
    delete: Uid,
    stretch: Uid,
    ending: Ending,
}

impl Operation for Abandon {
    fn name(&self) -> &'static str {
        "Abandon"
    }

    fn execute(&mut self, ctx: &mut OperationContext) -> Result<OperationReturn, OperationFault> {
        ctx.delete_entity(self.delete)
            .ok_or(OperationFault::MissingEntity(self.delete.get()))?;
        ctx.edit(self.stretch, |object, arena| {
            object.as_line(arena).unwrap().set_end(Point3::new(50.0, 50.0, 0.0));
        })?;
        ctx.create_entity(ElementKind::Circle)?;
        match self.ending {
            Ending::Cancel => Ok(OperationReturn::Cancel),
            Ending::Fault => Err(OperationFault::Failed("late failure".to_string())),
            Ending::Panic => panic!("gave up"),
        }
    }
}

fn seeded_line(document: &Document, start: Point3, end: Point3) -> Uid {
    let uid = document
        .create_entity(ElementKind::Line, UidRequest::Auto, None)
        .unwrap()
        .uid();
    document.with_entity_mut(uid, |object, arena| {
        let mut line = object.as_line(arena).unwrap();
        line.set_start(start);
        line.set_end(end);
    });
    uid
}

#[test]
fn abandoned_operations_restore_deleted_and_edited_entities() {
    let seed = Document::new();
    let a = seeded_line(&seed, Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0));
    let b = seeded_line(&seed, Point3::new(2.0, 0.0, 0.0), Point3::new(3.0, 3.0, 0.0));

    let endings = [
        ("Abandon Cancel", Ending::Cancel, OperationOutcome::Cancelled),
        ("Abandon Fault", Ending::Fault, OperationOutcome::Faulted("late failure".to_string())),
        ("Abandon Panic", Ending::Panic, OperationOutcome::Faulted("gave up".to_string())),
    ];
    let mut registry = OperationRegistry::empty();
    for (name, ending, _) in &endings {
        let ending = *ending;
        registry.register(*name, move || {
            Box::new(Abandon {
                delete: a,
                stretch: b,
                ending,
            }) as Box<dyn Operation>
        });
    }
    let mut engine = OperationEngine::new(registry, EngineSettings::default());
    engine.open_document(seed);
    let document = engine.active_document().unwrap();
    let before_a = document.peek_entity(a).unwrap();
    let before_b = document.peek_entity(b).unwrap();

    for (name, _, expected) in endings {
        let handle = engine.begin_operation(name).unwrap();
        let operation = handle.id();
        assert_eq!(handle.wait(), expected, "{name}");

        assert_eq!(document.uids(), vec![a, b], "{name}");
        assert_eq!(document.peek_entity(a).unwrap(), before_a, "{name}");
        assert_eq!(document.peek_entity(b).unwrap(), before_b, "{name}");
        assert_eq!(
            line_points(&document, b),
            (Point3::new(2.0, 0.0, 0.0), Point3::new(3.0, 3.0, 0.0))
        );
        assert_eq!(document.history_len(), 0);
        assert_eq!(document.staged_len(operation), 0);
    }
}
