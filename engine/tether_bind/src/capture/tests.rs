use std::cell::Cell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use tether_ir::{NotifyIndex, ObjectId, PropertyIndex, Value};

use crate::guard::DependencySource;
use crate::testing::{script, TestBench};

fn prop(object: ObjectId, notify: u32) -> DependencySource {
    DependencySource::Property {
        object,
        notify: NotifyIndex(notify),
    }
}

/// Expression reading the given properties of `object` in the order held
/// by `order`.
fn reader(
    bench: &TestBench,
    object: ObjectId,
    order: &Rc<std::cell::RefCell<Vec<PropertyIndex>>>,
) -> crate::ExprId {
    let order = Rc::clone(order);
    bench
        .engine
        .create_expression(
            bench.root,
            None,
            script(move |cx, _, _| {
                let mut sum = 0;
                for property in order.borrow().iter() {
                    sum += cx.read(object, *property).as_int().unwrap_or(0);
                }
                Ok(Value::Int(sum))
            }),
        )
        .unwrap()
}

#[test]
fn guards_follow_the_latest_read_set() {
    let bench = TestBench::new();
    let a = bench.host.add_object("Item");
    let x = bench.host.add_property(a, "x", Value::Int(1));
    let y = bench.host.add_property(a, "y", Value::Int(2));
    let order = Rc::new(std::cell::RefCell::new(vec![x, y]));
    let expr = reader(&bench, a, &order);

    assert_eq!(bench.engine.evaluate(expr).value, Value::Int(3));
    assert_eq!(bench.engine.dependencies(expr), vec![prop(a, 1), prop(a, 0)]);

    *order.borrow_mut() = vec![y];
    bench.engine.evaluate(expr);
    assert_eq!(bench.engine.dependencies(expr), vec![prop(a, 1)]);
    assert_eq!(bench.engine.guard_stats().live, 1);
}

#[test]
fn stable_reads_allocate_nothing() {
    let bench = TestBench::new();
    let a = bench.host.add_object("Item");
    let x = bench.host.add_property(a, "x", Value::Int(1));
    let y = bench.host.add_property(a, "y", Value::Int(2));
    let order = Rc::new(std::cell::RefCell::new(vec![x, y]));
    let expr = reader(&bench, a, &order);

    bench.engine.evaluate(expr);
    let before = bench.engine.guard_stats();
    bench.engine.evaluate(expr);
    bench.engine.evaluate(expr);
    assert_eq!(bench.engine.guard_stats(), before);
}

#[test]
fn reordered_reads_recycle_from_the_front() {
    let bench = TestBench::new();
    let a = bench.host.add_object("Item");
    let x = bench.host.add_property(a, "x", Value::Int(1));
    let y = bench.host.add_property(a, "y", Value::Int(2));
    let order = Rc::new(std::cell::RefCell::new(vec![x, y]));
    let expr = reader(&bench, a, &order);
    bench.engine.evaluate(expr);

    // Reading y first discards x (ahead of it), reuses y, then needs a new x.
    *order.borrow_mut() = vec![y, x];
    let before = bench.engine.guard_stats();
    bench.engine.evaluate(expr);
    let after = bench.engine.guard_stats();
    assert_eq!(after.acquired - before.acquired, 1);
    assert_eq!(after.recycled - before.recycled, 1);
    assert_eq!(bench.engine.dependencies(expr), vec![prop(a, 0), prop(a, 1)]);
}

#[test]
fn duplicate_reads_share_one_guard() {
    let bench = TestBench::new();
    let a = bench.host.add_object("Item");
    let x = bench.host.add_property(a, "x", Value::Int(1));
    let order = Rc::new(std::cell::RefCell::new(vec![x, x, x]));
    let expr = reader(&bench, a, &order);

    assert_eq!(bench.engine.evaluate(expr).value, Value::Int(3));
    assert_eq!(bench.engine.dependencies(expr), vec![prop(a, 0)]);
}

#[test]
fn non_notifiable_reads_produce_diagnostic_lines() {
    let bench = TestBench::new();
    let a = bench.host.add_object("Config");
    let limit = bench.host.add_constant_property(a, "limit", Value::Int(5));
    let order = Rc::new(std::cell::RefCell::new(vec![limit, limit]));
    let location = tether_ir::SourceLocation::new("file:///main.qml", 4, 9);
    let expr = {
        let order = Rc::clone(&order);
        bench
            .engine
            .create_expression(
                bench.root,
                None,
                crate::testing::script_at(location, move |cx, _, _| {
                    let first = order.borrow()[0];
                    Ok(cx.read(a, first))
                }),
            )
            .unwrap()
    };

    assert_eq!(bench.engine.evaluate(expr).value, Value::Int(5));
    assert!(bench.engine.dependencies(expr).is_empty());
    assert_eq!(
        bench.warnings.lines(),
        vec![
            "Expression file:///main.qml:4:9 depends on non-NOTIFYable properties:".to_owned(),
            "    Config::limit".to_owned(),
        ]
    );
}

#[test]
fn non_notifiable_lines_can_be_disabled() {
    let bench = TestBench::with(|b| b.report_non_notifiable(false));
    let a = bench.host.add_object("Config");
    let limit = bench.host.add_constant_property(a, "limit", Value::Int(5));
    let expr = bench
        .engine
        .create_expression(bench.root, None, script(move |cx, _, _| Ok(cx.read(a, limit))))
        .unwrap();
    bench.engine.evaluate(expr);
    assert!(bench.warnings.lines().is_empty());
}

#[test]
fn bindable_properties_use_the_observe_path() {
    let bench = TestBench::new();
    let a = bench.host.add_object("Item");
    let width = bench.host.add_bindable_property(a, "width", Value::Int(10));
    let expr = bench
        .engine
        .create_expression(bench.root, None, script(move |cx, _, _| Ok(cx.read(a, width))))
        .unwrap();
    let hits = Rc::new(Cell::new(0));
    {
        let hits = Rc::clone(&hits);
        bench
            .engine
            .on_invalidated(expr, move |_, _| hits.set(hits.get() + 1))
            .unwrap();
    }

    bench.engine.evaluate(expr);
    assert_eq!(
        bench.engine.dependencies(expr),
        vec![DependencySource::Bindable { object: a, property: width }]
    );
    assert_eq!(bench.host.observer_count(a, width), 1);

    // A stable re-capture does not register a second observation.
    bench.engine.evaluate(expr);
    assert_eq!(bench.host.observer_count(a, width), 1);

    bench.host.set(&bench.engine, a, width, Value::Int(11));
    assert_eq!(hits.get(), 1);
    assert_eq!(bench.host.observer_count(a, width), 0);

    bench.engine.evaluate(expr);
    assert_eq!(bench.host.observer_count(a, width), 1);
}

#[test]
fn capture_off_reads_without_guards() {
    let bench = TestBench::new();
    let a = bench.host.add_object("Item");
    let x = bench.host.add_property(a, "x", Value::Int(1));
    let saw_capture = Rc::new(Cell::new(true));
    let expr = {
        let saw_capture = Rc::clone(&saw_capture);
        bench
            .engine
            .create_expression(
                bench.root,
                None,
                script(move |cx, _, _| {
                    saw_capture.set(cx.is_capturing());
                    Ok(cx.read(a, x))
                }),
            )
            .unwrap()
    };
    bench.engine.set_notify_on_value_changed(expr, false).unwrap();

    assert_eq!(bench.engine.evaluate(expr).value, Value::Int(1));
    assert!(!saw_capture.get());
    assert_eq!(bench.engine.guard_stats().acquired, 0);
}
