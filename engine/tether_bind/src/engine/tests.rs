use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pretty_assertions::assert_eq;
use tether_ir::{NotifyIndex, SourceLocation, Value};

use super::*;
use crate::host::Exception;
use crate::testing::{script, script_at, TestBench};

fn failing(bench: &TestBench, message: &'static str) -> ExprId {
    bench
        .engine
        .create_expression(
            bench.root,
            None,
            script_at(SourceLocation::new("file:///f.qml", 2, 5), move |_, _, _| {
                Err(Exception::new(message))
            }),
        )
        .unwrap()
}

#[test]
fn notifier_emit_invalidates_readers() {
    let bench = TestBench::new();
    let notifier = bench.engine.create_notifier("tick");
    let expr = bench
        .engine
        .create_expression(
            bench.root,
            None,
            script(move |cx, _, _| {
                cx.read_notifier(notifier);
                Ok(Value::Null)
            }),
        )
        .unwrap();

    bench.engine.evaluate(expr);
    assert_eq!(bench.engine.emit(notifier), Ok(1));
    assert_eq!(bench.engine.emit(notifier), Ok(0));
    assert_eq!(bench.engine.notifier_label(notifier).as_deref(), Some("tick"));
}

#[test]
fn destroyed_notifier_detaches_guards() {
    let bench = TestBench::new();
    let notifier = bench.engine.create_notifier("tick");
    let expr = bench
        .engine
        .create_expression(
            bench.root,
            None,
            script(move |cx, _, _| {
                cx.read_notifier(notifier);
                Ok(Value::Null)
            }),
        )
        .unwrap();
    bench.engine.evaluate(expr);

    bench.engine.destroy_notifier(notifier).unwrap();
    assert!(bench.engine.dependencies(expr).is_empty());
    assert_eq!(
        bench.engine.emit(notifier),
        Err(EngineError::StaleNotifier(notifier))
    );
    // The detached guard is recycled by the next evaluation.
    bench.engine.evaluate(expr);
    assert_eq!(bench.engine.guard_stats().live, 0);
}

#[test]
fn shared_notify_index_fires_every_reader() {
    let bench = TestBench::new();
    let a = bench.host.add_object("Item");
    let x = bench.host.add_property(a, "x", Value::Int(1));
    let y = bench
        .host
        .add_property_sharing(a, "y", Value::Int(2), NotifyIndex(x.0));
    let read_x = bench
        .engine
        .create_expression(bench.root, None, script(move |cx, _, _| Ok(cx.read(a, x))))
        .unwrap();
    let read_y = bench
        .engine
        .create_expression(bench.root, None, script(move |cx, _, _| Ok(cx.read(a, y))))
        .unwrap();
    bench.engine.evaluate(read_x);
    bench.engine.evaluate(read_y);

    assert_eq!(bench.engine.notify_property(a, NotifyIndex(x.0)), 2);
}

#[test]
fn invalidation_may_destroy_other_targets() {
    let bench = TestBench::new();
    let a = bench.host.add_object("Item");
    let x = bench.host.add_property(a, "x", Value::Int(1));
    let read = script(move |cx, _, _| Ok(cx.read(a, x)));
    let first = bench
        .engine
        .create_expression(bench.root, None, Rc::clone(&read))
        .unwrap();
    let second = bench
        .engine
        .create_expression(bench.root, None, read)
        .unwrap();
    let second_ran = Rc::new(Cell::new(false));
    bench
        .engine
        .on_invalidated(first, move |engine, _| {
            engine.destroy_expression(second);
        })
        .unwrap();
    {
        let second_ran = Rc::clone(&second_ran);
        bench
            .engine
            .on_invalidated(second, move |_, _| second_ran.set(true))
            .unwrap();
    }
    bench.engine.evaluate(first);
    bench.engine.evaluate(second);

    assert_eq!(bench.engine.notify_property(a, NotifyIndex(x.0)), 1);
    assert!(!second_ran.get());
    assert_eq!(bench.engine.guard_stats().live, 1);
}

#[test]
fn reevaluation_during_delivery_skips_recaptured_guard() {
    let bench = TestBench::new();
    let a = bench.host.add_object("Item");
    let x = bench.host.add_property(a, "x", Value::Int(1));
    let read = script(move |cx, _, _| Ok(cx.read(a, x)));
    let first = bench
        .engine
        .create_expression(bench.root, None, Rc::clone(&read))
        .unwrap();
    let second = bench
        .engine
        .create_expression(bench.root, None, read)
        .unwrap();
    let second_hits = Rc::new(Cell::new(0));
    // Handling the first re-evaluates the second, which re-captures its
    // guard and cancels its pending notification.
    bench
        .engine
        .on_invalidated(first, move |engine, _| {
            engine.evaluate(second);
        })
        .unwrap();
    {
        let second_hits = Rc::clone(&second_hits);
        bench
            .engine
            .on_invalidated(second, move |_, _| second_hits.set(second_hits.get() + 1))
            .unwrap();
    }
    bench.engine.evaluate(first);
    bench.engine.evaluate(second);

    assert_eq!(bench.engine.notify_property(a, NotifyIndex(x.0)), 1);
    assert_eq!(second_hits.get(), 0);
    assert!(!bench.engine.is_dirty(second));
}

#[test]
fn object_destroyed_releases_everything() {
    let bench = TestBench::new();
    let scope = bench.host.add_object("Item");
    let other = bench.host.add_object("Item");
    let x = bench.host.add_property(other, "x", Value::Int(1));
    let scoped = bench
        .engine
        .create_expression(bench.root, Some(scope), script(|_, _, _| Ok(Value::Null)))
        .unwrap();
    let reader = bench
        .engine
        .create_expression(bench.root, None, script(move |cx, _, _| Ok(cx.read(other, x))))
        .unwrap();
    bench.engine.install_object(bench.root, scope, false).unwrap();
    bench
        .engine
        .set_context_object(bench.root, Some(scope))
        .unwrap();
    bench.engine.evaluate(reader);

    bench.host.destroy_object(&bench.engine, scope);
    assert!(!bench.engine.is_expression_alive(scoped));
    assert_eq!(bench.engine.context_for_object(scope), None);
    assert_eq!(bench.engine.context_object(bench.root), None);
    assert!(bench.engine.context_objects(bench.root).is_empty());

    bench.host.destroy_object(&bench.engine, other);
    assert!(bench.engine.is_expression_alive(reader));
    assert!(bench.engine.dependencies(reader).is_empty());
    assert_eq!(bench.engine.notify_property(other, NotifyIndex(x.0)), 0);
}

#[test]
fn batch_defers_errors_until_outermost_end() {
    let bench = TestBench::new();
    let first = failing(&bench, "first");
    let second = failing(&bench, "second");

    let outer = bench.engine.begin_creation().unwrap();
    {
        let inner = bench.engine.begin_creation().unwrap();
        assert_eq!(inner.depth(), 2);
        bench.engine.evaluate(first);
        bench.engine.evaluate(first);
        bench.engine.evaluate(second);
    }
    assert_eq!(bench.engine.deferred_error_count(), 2);
    assert!(bench.warnings.errors().is_empty());

    outer.finish();
    assert!(!bench.engine.in_creation());
    assert_eq!(bench.reported(), vec!["second".to_owned(), "first".to_owned()]);
    assert_eq!(bench.engine.deferred_error_count(), 0);
    // The error itself stays with the expression.
    assert!(bench.engine.expression_error(first).is_some());
}

#[test]
fn cleared_error_relinks_in_next_batch() {
    let bench = TestBench::new();
    let expr = failing(&bench, "again");

    let batch = bench.engine.begin_creation().unwrap();
    bench.engine.evaluate(expr);
    bench.engine.clear_error(expr);
    assert_eq!(bench.engine.deferred_error_count(), 0);
    bench.engine.evaluate(expr);
    assert_eq!(bench.engine.deferred_error_count(), 1);
    drop(batch);
    assert_eq!(bench.reported(), vec!["again".to_owned()]);
}

#[test]
fn destroyed_expression_leaves_the_batch() {
    let bench = TestBench::new();
    let expr = failing(&bench, "gone");
    let batch = bench.engine.begin_creation().unwrap();
    bench.engine.evaluate(expr);
    bench.engine.destroy_expression(expr);
    drop(batch);
    assert!(bench.reported().is_empty());
}

#[test]
fn creation_depth_is_limited() {
    let bench = TestBench::with(|b| b.max_creation_depth(2));
    let _a = bench.engine.begin_creation().unwrap();
    let _b = bench.engine.begin_creation().unwrap();
    assert_eq!(
        bench.engine.begin_creation().err(),
        Some(EngineError::CreationRecursion { limit: 2 })
    );
}

#[test]
fn custom_sink_receives_reports() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = {
        let seen = Rc::clone(&seen);
        WarningSink::custom(move |e| seen.borrow_mut().push(e.to_string()), |_| {})
    };
    let host = crate::testing::TestHost::new();
    let engine = Engine::builder(host).warnings(sink).build();
    let root = engine.create_root_context(None);
    let expr = engine
        .create_expression(
            root,
            None,
            script(|_, _, _| Err(Exception::new("bad"))),
        )
        .unwrap();
    engine.evaluate(expr);
    assert_eq!(*seen.borrow(), vec!["<Unknown File>: bad".to_owned()]);
}

#[test]
fn clones_share_state() {
    let bench = TestBench::new();
    let other = bench.engine.clone();
    assert!(other.ptr_eq(&bench.engine));
    let ctx = other.create_root_context(None);
    assert!(bench.engine.context_exists(ctx));
}
