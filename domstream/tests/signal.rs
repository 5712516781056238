use domstream::{Chunk, Signal, SignalKind, Stream, SubscriptionId};
use parking_lot::Mutex;
use std::sync::Arc;

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn tag(stream: &Stream, kind: SignalKind, log: &Log, name: &str) -> SubscriptionId {
    let log = Arc::clone(log);
    let name = name.to_string();
    stream.on(kind, move |_, _| log.lock().push(name.clone()))
}

#[test]
fn test_handlers_run_in_subscription_order() {
    let s = Stream::new("s");
    let log = new_log();
    tag(&s, SignalKind::Close, &log, "first");
    tag(&s, SignalKind::Close, &log, "second");
    tag(&s, SignalKind::Close, &log, "third");

    assert_eq!(s.emit(Signal::Close), 3);
    assert_eq!(*log.lock(), vec!["first", "second", "third"]);
}

#[test]
fn test_emit_without_handlers() {
    let s = Stream::new("s");
    assert_eq!(s.emit(Signal::Finish), 0);
    assert_eq!(s.listener_count(SignalKind::Finish), 0);
}

#[test]
fn test_kinds_are_independent() {
    let s = Stream::new("s");
    let log = new_log();
    tag(&s, SignalKind::Close, &log, "close");
    tag(&s, SignalKind::Finish, &log, "finish");

    s.emit(Signal::Finish);
    assert_eq!(*log.lock(), vec!["finish"]);
}

#[test]
fn test_handler_receives_emitter_and_payload() {
    let s = Stream::new("emitter");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    s.on(SignalKind::Data, move |stream, signal| {
        if let Signal::Data(chunk) = signal {
            seen_clone
                .lock()
                .push((stream.hint().to_string(), chunk.clone()));
        }
    });

    s.emit(Signal::Data(Chunk::from("x")));
    assert_eq!(
        *seen.lock(),
        vec![("emitter".to_string(), Chunk::from("x"))]
    );
}

#[test]
fn test_once_runs_once() {
    let s = Stream::new("s");
    let count = Arc::new(Mutex::new(0));
    let count_clone = Arc::clone(&count);
    s.once(SignalKind::Drain, move |_, _| *count_clone.lock() += 1);
    assert_eq!(s.listener_count(SignalKind::Drain), 1);

    s.emit(Signal::Drain);
    s.emit(Signal::Drain);
    assert_eq!(*count.lock(), 1);
    assert_eq!(s.listener_count(SignalKind::Drain), 0);
}

#[test]
fn test_once_not_refired_by_nested_emit() {
    let s = Stream::new("s");
    let count = Arc::new(Mutex::new(0));
    let count_clone = Arc::clone(&count);
    s.once(SignalKind::Close, move |stream, _| {
        *count_clone.lock() += 1;
        stream.emit(Signal::Close);
    });

    s.emit(Signal::Close);
    assert_eq!(*count.lock(), 1);
}

#[test]
fn test_off_is_idempotent() {
    let s = Stream::new("s");
    let log = new_log();
    let id = tag(&s, SignalKind::Close, &log, "a");
    tag(&s, SignalKind::Close, &log, "b");

    assert!(s.off(id));
    assert!(!s.off(id));
    s.emit(Signal::Close);
    assert_eq!(*log.lock(), vec!["b"]);
    assert_eq!(id.kind(), SignalKind::Close);
}

#[test]
fn test_off_after_once_fired() {
    let s = Stream::new("s");
    let id = s.once(SignalKind::Close, |_, _| {});
    s.emit(Signal::Close);
    assert!(!s.off(id));
}

#[test]
fn test_subscription_ids_are_distinct() {
    let s = Stream::new("s");
    let a = s.on(SignalKind::Close, |_, _| {});
    let b = s.on(SignalKind::Close, |_, _| {});
    assert_ne!(a, b);
}

#[test]
fn test_subscribe_during_emit_runs_next_time() {
    let s = Stream::new("s");
    let log = new_log();
    let log_clone = Arc::clone(&log);
    s.once(SignalKind::Close, move |stream, _| {
        log_clone.lock().push("outer".to_string());
        tag(stream, SignalKind::Close, &log_clone, "late");
    });

    s.emit(Signal::Close);
    assert_eq!(*log.lock(), vec!["outer"]);

    s.emit(Signal::Close);
    assert_eq!(*log.lock(), vec!["outer", "late"]);
}

#[test]
fn test_unsubscribe_during_emit_keeps_snapshot() {
    let s = Stream::new("s");
    let log = new_log();
    let victim: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

    let victim_clone = Arc::clone(&victim);
    s.on(SignalKind::Close, move |stream, _| {
        if let Some(id) = victim_clone.lock().take() {
            stream.off(id);
        }
    });
    let id = tag(&s, SignalKind::Close, &log, "victim");
    *victim.lock() = Some(id);

    s.emit(Signal::Close);
    assert_eq!(*log.lock(), vec!["victim"]);

    s.emit(Signal::Close);
    assert_eq!(*log.lock(), vec!["victim"]);
    assert_eq!(s.listener_count(SignalKind::Close), 1);
}

#[test]
fn test_handler_may_emit_other_signals() {
    let s = Stream::new("s");
    let log = new_log();
    s.on(SignalKind::Close, |stream, _| {
        stream.emit(Signal::Finish);
    });
    tag(&s, SignalKind::Finish, &log, "finish");
    tag(&s, SignalKind::Close, &log, "close");

    s.emit(Signal::Close);
    assert_eq!(*log.lock(), vec!["finish", "close"]);
}

#[test]
fn test_signal_kind_and_debug() {
    let s = Stream::new("s");
    assert_eq!(Signal::Data(Chunk::from("x")).kind(), SignalKind::Data);
    assert_eq!(Signal::End(None).kind(), SignalKind::End);
    assert_eq!(Signal::Pipe(s.clone()).kind(), SignalKind::Pipe);
    assert_eq!(format!("{:?}", Signal::Drain), "Drain");
    assert_eq!(
        format!("{:?}", Signal::Unpipe(s.clone())),
        format!("Unpipe({:?})", s.id())
    );
}
