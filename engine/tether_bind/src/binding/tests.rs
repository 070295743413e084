use pretty_assertions::assert_eq;
use tether_ir::Value;

use crate::host::Exception;
use crate::testing::{script, TestBench};

#[test]
fn binding_tracks_its_source() {
    let bench = TestBench::new();
    let source = bench.host.add_object("Slider");
    let value = bench.host.add_property(source, "value", Value::Int(2));
    let target = bench.host.add_object("Label");
    let text = bench.host.add_property(target, "text", Value::Null);

    bench
        .engine
        .bind_property(
            bench.root,
            target,
            text,
            script(move |cx, _, _| {
                let n = cx.read(source, value).as_int().unwrap_or(0);
                Ok(Value::Int(n * 10))
            }),
        )
        .unwrap();
    assert_eq!(bench.host.get(target, text), Value::Int(20));

    bench.host.set(&bench.engine, source, value, Value::Int(5));
    assert_eq!(bench.host.get(target, text), Value::Int(50));
    bench.host.set(&bench.engine, source, value, Value::Int(6));
    assert_eq!(bench.host.get(target, text), Value::Int(60));
}

#[test]
fn chained_bindings_propagate() {
    let bench = TestBench::new();
    let a = bench.host.add_object("Item");
    let x = bench.host.add_property(a, "x", Value::Int(1));
    let y = bench.host.add_property(a, "y", Value::Int(0));
    let z = bench.host.add_property(a, "z", Value::Int(0));

    let plus_one = |from| {
        script(move |cx, _, _| Ok(Value::Int(cx.read(a, from).as_int().unwrap_or(0) + 1)))
    };
    bench.engine.bind_property(bench.root, a, y, plus_one(x)).unwrap();
    bench.engine.bind_property(bench.root, a, z, plus_one(y)).unwrap();
    assert_eq!(bench.host.get(a, z), Value::Int(3));

    bench.host.set(&bench.engine, a, x, Value::Int(10));
    assert_eq!(bench.host.get(a, y), Value::Int(11));
    assert_eq!(bench.host.get(a, z), Value::Int(12));
}

#[test]
fn self_dependent_binding_reports_loop() {
    let bench = TestBench::new();
    let a = bench.host.add_object("Item");
    let x = bench.host.add_property(a, "x", Value::Int(1));

    bench
        .engine
        .bind_property(
            bench.root,
            a,
            x,
            script(move |cx, _, _| Ok(Value::Int(cx.read(a, x).as_int().unwrap_or(0) + 1))),
        )
        .unwrap();

    assert_eq!(bench.host.get(a, x), Value::Int(2));
    assert_eq!(bench.reported(), vec!["Binding loop detected".to_owned()]);
}

#[test]
fn failed_evaluation_keeps_previous_value() {
    let bench = TestBench::new();
    let a = bench.host.add_object("Item");
    let x = bench.host.add_property(a, "x", Value::Int(1));
    let y = bench.host.add_property(a, "y", Value::Int(0));

    bench
        .engine
        .bind_property(
            bench.root,
            a,
            y,
            script(move |cx, _, _| match cx.read(a, x) {
                Value::Int(n) if n >= 0 => Ok(Value::Int(n)),
                _ => Err(Exception::new("negative")),
            }),
        )
        .unwrap();
    bench.host.set(&bench.engine, a, x, Value::Int(-1));
    assert_eq!(bench.host.get(a, y), Value::Int(1));
    assert_eq!(bench.reported(), vec!["negative".to_owned()]);

    // The guard was re-armed by the failed evaluation.
    bench.host.set(&bench.engine, a, x, Value::Int(4));
    assert_eq!(bench.host.get(a, y), Value::Int(4));
}

#[test]
fn unbind_stops_updates() {
    let bench = TestBench::new();
    let a = bench.host.add_object("Item");
    let x = bench.host.add_property(a, "x", Value::Int(1));
    let y = bench.host.add_property(a, "y", Value::Int(0));
    let binding = bench
        .engine
        .bind_property(bench.root, a, y, script(move |cx, _, _| Ok(cx.read(a, x))))
        .unwrap();

    assert!(bench.engine.unbind(binding));
    bench.host.set(&bench.engine, a, x, Value::Int(9));
    assert_eq!(bench.host.get(a, y), Value::Int(1));
    assert_eq!(bench.engine.guard_stats().live, 0);
}

#[test]
fn binding_dies_with_its_target() {
    let bench = TestBench::new();
    let source = bench.host.add_object("Item");
    let x = bench.host.add_property(source, "x", Value::Int(1));
    let target = bench.host.add_object("Item");
    let y = bench.host.add_property(target, "y", Value::Int(0));
    let binding = bench
        .engine
        .bind_property(bench.root, target, y, script(move |cx, _, _| Ok(cx.read(source, x))))
        .unwrap();

    bench.host.destroy_object(&bench.engine, target);
    assert!(!bench.engine.is_expression_alive(binding));
    bench.host.set(&bench.engine, source, x, Value::Int(2));
    assert_eq!(bench.engine.guard_stats().live, 0);
}
