use std::cell::Cell;

use super::*;
use pretty_assertions::assert_eq;

#[test]
fn buffer_captures_errors_and_lines() {
    let (sink, buffer) = WarningSink::buffer();
    sink.report(&BindingError::new("first"));
    sink.line("a line");
    sink.report(&BindingError::new("second"));

    let descriptions: Vec<_> = buffer.errors().into_iter().map(|e| e.description).collect();
    assert_eq!(descriptions, vec!["first", "second"]);
    assert_eq!(buffer.lines(), vec!["a line".to_owned()]);

    buffer.clear();
    assert!(buffer.errors().is_empty());
}

#[test]
fn custom_forwards() {
    let reports = Rc::new(Cell::new(0));
    let lines = Rc::new(Cell::new(0));
    let sink = {
        let reports = Rc::clone(&reports);
        let lines = Rc::clone(&lines);
        WarningSink::custom(
            move |_| reports.set(reports.get() + 1),
            move |_| lines.set(lines.get() + 1),
        )
    };
    sink.report(&BindingError::new("x"));
    sink.line("y");
    sink.line("z");
    assert_eq!(reports.get(), 1);
    assert_eq!(lines.get(), 2);
}

#[test]
fn silent_and_log_do_not_panic() {
    WarningSink::Silent.report(&BindingError::new("dropped"));
    WarningSink::Log.line("logged");
    assert_eq!(format!("{:?}", WarningSink::default()), "Log");
}
