//! Concurrent audit event ingestion.
//!
//! ```text
//! source ─┐
//! source ─┼─> decode ─> flatten lists ─> normalize ─> filter ─> AuditEventStream
//! source ─┘
//! ```
//!
//! Every open source gets its own decoder thread, which hands each record on
//! as soon as it is decoded. The remaining stages are single tasks chained by
//! bounded channels. Records from one source keep their order; records from
//! different sources interleave arbitrarily.
//!
//! Cancelling (or dropping) the [`AuditEventStream`] flips a watch signal that
//! every stage and decoder checks, so abandoned pipelines wind down instead
//! of blocking forever on a full channel.

use std::io::BufReader;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_stream::Stream;
use tracing::{debug, trace, warn};

use pkg_constants::audit::{AUDIT_API_GROUP, KIND_EVENT_LIST, PIPELINE_CHANNEL_CAPACITY};
use pkg_constants::rbac::KIND_LIST;
use pkg_types::audit::AuditEvent;
use pkg_types::document::{DocumentError, decode_reader};

use crate::error::{AuditError, ErrorAggregate};
use crate::filter::{EventFilter, keep_event};
use crate::scheme::{EventScheme, GroupVersionKind};
use crate::source::{AuditSource, open_sources};

type Record = Result<Value, AuditError>;
pub type EventResult = Result<AuditEvent, AuditError>;

/// Configured pipeline, ready to run over a set of sources.
pub struct AuditPipeline {
    scheme: EventScheme,
    filters: Vec<Box<dyn EventFilter>>,
    capacity: usize,
}

impl Default for AuditPipeline {
    fn default() -> Self {
        Self::new(EventScheme::default())
    }
}

impl AuditPipeline {
    pub fn new(scheme: EventScheme) -> Self {
        Self {
            scheme,
            filters: Vec::new(),
            capacity: PIPELINE_CHANNEL_CAPACITY,
        }
    }

    /// Append a filter. Filters run in insertion order; the first to reject
    /// an event drops it.
    pub fn with_filter(mut self, filter: impl EventFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Start every stage. Must be called from within a Tokio runtime.
    pub fn run(self, sources: Vec<AuditSource>) -> AuditEventStream {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let capacity = self.capacity;

        let decoded = spawn_decoders(sources, capacity, &cancel_rx);

        let flattened = spawn_stage(decoded, capacity, cancel_rx.clone(), |record: Record| {
            match record {
                Ok(value) => flatten_list(value),
                Err(e) => vec![Err(e)],
            }
        });

        let scheme = self.scheme;
        let normalized = spawn_stage(flattened, capacity, cancel_rx.clone(), move |record: Record| {
            vec![record.and_then(|value| scheme.convert(value))]
        });

        let filters = self.filters;
        let filtered = spawn_stage(normalized, capacity, cancel_rx, move |result: EventResult| {
            match result {
                Ok(event) if !keep_event(&filters, &event) => {
                    trace!(
                        "[{}] event dropped by filter [eventId={}]",
                        event.user.username, event.audit_id
                    );
                    vec![]
                }
                other => vec![other],
            }
        });

        AuditEventStream {
            rx: filtered,
            cancel: cancel_tx,
        }
    }
}

/// Open `descriptors` and run `pipeline` over whatever opened. Source-open
/// failures come back in the aggregate; they do not stop the other sources.
pub async fn read_audit_events(
    descriptors: &[String],
    pipeline: AuditPipeline,
) -> (AuditEventStream, ErrorAggregate) {
    let (sources, errors) = open_sources(descriptors).await;
    debug!(
        "Opened {} source(s), {} failed",
        sources.len(),
        errors.len()
    );
    (pipeline.run(sources), ErrorAggregate::from(errors))
}

// ─── Stage 1: per-source decoders ───────────────────────────────────────────

fn spawn_decoders(
    sources: Vec<AuditSource>,
    capacity: usize,
    cancel: &watch::Receiver<bool>,
) -> mpsc::Receiver<Record> {
    let (tx, rx) = mpsc::channel(capacity);
    for source in sources {
        let name = source.name.clone();
        let decoder_tx = tx.clone();
        let cancel = cancel.clone();
        // A plain thread, not the blocking pool: a source that never reaches
        // EOF (an open stdin) must not hold up runtime shutdown.
        let spawned = std::thread::Builder::new()
            .name("audit-decode".to_string())
            .spawn(move || decode_source(source, decoder_tx, cancel));
        if let Err(error) = spawned {
            warn!("Failed to start decoder for {}: {}", name, error);
            let _ = tx.try_send(Err(AuditError::Read {
                source_name: name,
                error,
            }));
        }
    }
    // The merged channel closes once the last decoder drops its sender.
    rx
}

/// Decode one source record by record until EOF, a read error, or cancel.
fn decode_source(source: AuditSource, tx: mpsc::Sender<Record>, cancel: watch::Receiver<bool>) {
    debug!("Decoding {}", source.name);
    let name = source.name;
    decode_reader(BufReader::new(source.reader), |result| {
        if *cancel.borrow() {
            return ControlFlow::Break(());
        }
        let record = result.map_err(|error| match error {
            DocumentError::Io(error) => AuditError::Read {
                source_name: name.clone(),
                error,
            },
            error => AuditError::Decode {
                source_name: name.clone(),
                error,
            },
        });
        match tx.blocking_send(record) {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    });
    debug!("Finished {}", name);
}

// ─── Stages 2-4 ─────────────────────────────────────────────────────────────

/// Run `step` over every item of `input` on its own task, forwarding what it
/// returns. Stops when the input closes, the output is dropped, or the
/// pipeline is cancelled.
fn spawn_stage<I, O, F>(
    mut input: mpsc::Receiver<I>,
    capacity: usize,
    mut cancel: watch::Receiver<bool>,
    mut step: F,
) -> mpsc::Receiver<O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> Vec<O> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.changed() => break,
                item = input.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            for out in step(item) {
                tokio::select! {
                    biased;
                    _ = cancel.changed() => return,
                    sent = tx.send(out) => if sent.is_err() {
                        return;
                    },
                }
            }
        }
    });
    rx
}

/// Unroll a `v1 List` or `audit.k8s.io EventList` into its items; anything
/// else passes through. Items without their own `apiVersion`/`kind` inherit
/// the list's, minus the `List` suffix.
fn flatten_list(value: Value) -> Vec<Record> {
    let gvk = GroupVersionKind::of(&value);
    let is_list = (gvk.group.is_empty() && gvk.version == "v1" && gvk.kind == KIND_LIST)
        || (gvk.group == AUDIT_API_GROUP && gvk.kind == KIND_EVENT_LIST);
    if !is_list {
        return vec![Ok(value)];
    }

    let items = match value {
        Value::Object(mut map) => map.remove("items"),
        _ => None,
    };
    let items = match items {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return vec![Err(AuditError::ListFlatten {
                kind: gvk.kind,
                message: format!("items is not an array: {}", other),
            })];
        }
    };

    let item_kind = gvk.kind.trim_end_matches("List").to_string();
    let api_version = gvk.api_version();
    items
        .into_iter()
        .map(|mut item| {
            if let Value::Object(map) = &mut item {
                map.entry("apiVersion")
                    .or_insert_with(|| Value::String(api_version.clone()));
                map.entry("kind")
                    .or_insert_with(|| Value::String(item_kind.clone()));
                Ok(item)
            } else {
                Err(AuditError::ListFlatten {
                    kind: gvk.kind.clone(),
                    message: format!("item is not an object: {}", item),
                })
            }
        })
        .collect()
}

// ─── Consumer handle ────────────────────────────────────────────────────────

/// Output of a running pipeline. Dropping it cancels every stage.
pub struct AuditEventStream {
    rx: mpsc::Receiver<EventResult>,
    cancel: watch::Sender<bool>,
}

impl AuditEventStream {
    pub async fn recv(&mut self) -> Option<EventResult> {
        self.rx.recv().await
    }

    /// Ask every stage and decoder to stop. Items already in flight may
    /// still be received.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Drain the stream, splitting events from per-record errors.
    pub async fn collect(mut self) -> (Vec<AuditEvent>, ErrorAggregate) {
        let mut events = Vec::new();
        let mut errors = ErrorAggregate::new();
        while let Some(result) = self.recv().await {
            match result {
                Ok(event) => events.push(event),
                Err(e) => errors.push(e),
            }
        }
        (events, errors)
    }
}

impl Stream for AuditEventStream {
    type Item = EventResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for AuditEventStream {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
    }
}
