//! Message dispatch.
//!
//! Each open topic runs one dispatch task that decodes inbound payloads and
//! calls every registered handler in registration order. A handler that
//! returns an error or panics is logged and skipped; the rest still run.

use crate::error::HandlerError;
use crate::handle::HandleId;
use crate::metrics;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tether_protocol::Payload;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Result returned by a subscriber callback.
pub type HandlerResult = Result<(), HandlerError>;

/// A subscriber callback.
pub type Handler = Arc<dyn Fn(&Payload) -> HandlerResult + Send + Sync>;

/// Handlers registered against one topic, keyed (and ordered) by handle.
pub(crate) type HandlerSet = Arc<RwLock<BTreeMap<HandleId, Handler>>>;

/// Outcome of dispatching one payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that returned `Ok`.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Copy the current handlers out so no lock is held while they run.
pub(crate) fn snapshot(handlers: &HandlerSet) -> Vec<(HandleId, Handler)> {
    handlers
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .map(|(id, handler)| (*id, Arc::clone(handler)))
        .collect()
}

/// Call every handler with `payload`, isolating failures.
pub fn dispatch(topic: &str, payload: &Payload, handlers: &[(HandleId, Handler)]) -> DispatchReport {
    let mut report = DispatchReport::default();

    for (id, handler) in handlers {
        match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            Ok(Ok(())) => report.delivered += 1,
            Ok(Err(e)) => {
                warn!(topic = %topic, handle = %id, error = %e, "Handler returned an error");
                metrics::record_handler_failure("error");
                report.failed += 1;
            }
            Err(panic) => {
                warn!(
                    topic = %topic,
                    handle = %id,
                    panic = %panic_message(panic.as_ref()),
                    "Handler panicked"
                );
                metrics::record_handler_failure("panic");
                report.failed += 1;
            }
        }
    }

    metrics::record_dispatched(report.delivered);
    report
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Dispatch loop for one open topic. Ends when the inbox sender is dropped
/// or the task is aborted.
pub(crate) async fn run(topic: String, mut inbox: mpsc::UnboundedReceiver<String>, handlers: HandlerSet) {
    debug!(topic = %topic, "Dispatch task started");

    while let Some(raw) = inbox.recv().await {
        let payload = Payload::decode(&raw);
        if payload.is_raw() {
            trace!(topic = %topic, "Payload is not JSON, delivering raw text");
            metrics::record_decode_fallback();
        }

        let handlers = snapshot(&handlers);
        let report = dispatch(&topic, &payload, &handlers);
        trace!(
            topic = %topic,
            delivered = report.delivered,
            failed = report.failed,
            "Dispatched message"
        );
    }

    debug!(topic = %topic, "Dispatch task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Handler {
        let log = Arc::clone(log);
        Arc::new(move |payload: &Payload| -> HandlerResult {
            log.lock().unwrap().push(format!("{name}:{payload}"));
            Ok(())
        })
    }

    #[test]
    fn test_dispatch_reaches_every_handler_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handlers = vec![
            (HandleId::next(), recorder(&log, "a")),
            (HandleId::next(), recorder(&log, "b")),
        ];

        let report = dispatch("/t", &Payload::decode("hi"), &handlers);
        assert_eq!(report, DispatchReport { delivered: 2, failed: 0 });
        assert_eq!(*log.lock().unwrap(), vec!["a:hi", "b:hi"]);
    }

    #[test]
    fn test_failing_handlers_do_not_block_siblings() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let erroring: Handler = Arc::new(|_: &Payload| -> HandlerResult { Err("boom".into()) });
        let panicking: Handler = Arc::new(|_: &Payload| -> HandlerResult { panic!("handler exploded") });
        let handlers = vec![
            (HandleId::next(), erroring),
            (HandleId::next(), panicking),
            (HandleId::next(), recorder(&log, "ok")),
        ];

        let report = dispatch("/t", &Payload::decode(r#"{"type":"ping"}"#), &handlers);
        assert_eq!(report, DispatchReport { delivered: 1, failed: 2 });
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_run_stops_when_inbox_closes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handlers: HandlerSet = Arc::new(RwLock::new(BTreeMap::new()));
        handlers
            .write()
            .unwrap()
            .insert(HandleId::next(), recorder(&log, "h"));

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run("/t".to_string(), rx, Arc::clone(&handlers)));

        tx.send(r#"{"type":"ping"}"#.to_string()).unwrap();
        tx.send("raw".to_string()).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![r#"h:{"type":"ping"}"#, "h:raw"]
        );
    }
}
