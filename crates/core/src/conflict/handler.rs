//! Side effects of resolving conflicts.
//!
//! The [`ConflictResolutionHandler`] moves each conflict from
//! `Unresolved` to one of its terminal states, notifies the [`EventSink`],
//! and collects the follow-up get requests that bring the workspace in line
//! with the resolutions. The requests are drained once per pass and issued
//! as a single batched get.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ResolutionError;
use crate::models::{
    Conflict, ConflictState, GetRequest, RecursionType, Resolution, SeverityType, VersionSpec,
};

/// Notification emitted while resolving conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResolutionEvent {
    ConflictResolved {
        conflict_id: i32,
        server_item: String,
        resolution: Resolution,
        /// Whether the user should be told about this resolution.
        report: bool,
    },
    NonFatalError {
        conflict_id: i32,
        severity: SeverityType,
        message: String,
    },
}

/// Receiver of resolution events. Delivery is fire-and-forget.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ResolutionEvent);
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ResolutionEvent) {
        match event {
            ResolutionEvent::ConflictResolved {
                conflict_id,
                server_item,
                resolution,
                report,
            } if report => {
                info!(conflict_id, server_item = %server_item, %resolution, "conflict resolved");
            }
            ResolutionEvent::ConflictResolved {
                conflict_id,
                server_item,
                resolution,
                ..
            } => {
                debug!(
                    conflict_id,
                    server_item = %server_item,
                    %resolution,
                    "conflict resolved silently"
                );
            }
            ResolutionEvent::NonFatalError {
                conflict_id,
                severity,
                message,
            } => {
                warn!(conflict_id, %severity, "{}", message);
            }
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ResolutionEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ResolutionEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<ResolutionEvent> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: ResolutionEvent) {
        self.lock().push(event);
    }
}

/// Resolution side effects for one pass over a set of conflicts.
///
/// Safe to share between threads resolving independent conflicts. Dropping
/// the handler discards any requests that were not taken.
pub struct ConflictResolutionHandler<'a> {
    sink: &'a dyn EventSink,
    requests: Mutex<Vec<GetRequest>>,
}

impl<'a> ConflictResolutionHandler<'a> {
    pub fn new(sink: &'a dyn EventSink) -> Self {
        Self {
            sink,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> MutexGuard<'_, Vec<GetRequest>> {
        self.requests.lock().unwrap_or_else(|poisoned| {
            warn!("get request list mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Mark `conflict` resolved with `resolution`, notify the sink and queue
    /// the follow-up get. Returns the queued request.
    pub fn on_resolved(
        &self,
        conflict: &mut Conflict,
        resolution: Resolution,
        report: bool,
    ) -> Result<GetRequest, ResolutionError> {
        match conflict.state {
            ConflictState::Unresolved => {}
            ConflictState::Resolved => {
                return Err(ResolutionError::AlreadyResolved(conflict.conflict_id))
            }
            ConflictState::Errored => {
                return Err(ResolutionError::AlreadyErrored(conflict.conflict_id))
            }
        }

        conflict.state = ConflictState::Resolved;
        conflict.resolution = resolution;

        self.sink.emit(ResolutionEvent::ConflictResolved {
            conflict_id: conflict.conflict_id,
            server_item: conflict.your_server_item.clone(),
            resolution,
            report,
        });

        let request = follow_up_request(conflict);
        debug!(
            conflict_id = conflict.conflict_id,
            item = %request.item,
            version = %request.version,
            "queued follow-up get"
        );
        self.requests().push(request.clone());
        Ok(request)
    }

    /// Mark `conflict` as failed and forward `error` to the sink. A conflict
    /// that already reached a terminal state keeps it; the error is still
    /// reported.
    pub fn on_error(&self, conflict: &mut Conflict, error: &ResolutionError) {
        if conflict.state == ConflictState::Unresolved {
            conflict.state = ConflictState::Errored;
        }
        warn!(conflict_id = conflict.conflict_id, error = %error, "conflict resolution failed");
        self.sink.emit(ResolutionEvent::NonFatalError {
            conflict_id: conflict.conflict_id,
            severity: SeverityType::Error,
            message: error.to_string(),
        });
    }

    /// Number of queued requests.
    pub fn pending_requests(&self) -> usize {
        self.requests().len()
    }

    /// Drain the queued requests, in the order their conflicts resolved.
    pub fn take_get_requests(&self) -> Vec<GetRequest> {
        std::mem::take(&mut *self.requests())
    }
}

/// The get that refreshes the local copy of a resolved conflict.
///
/// A missing target (the item was deleted) falls back to the source path.
/// Version 0 means the server item is gone; asking for changeset 1 makes the
/// get delete the local copy or finish an interrupted restore.
fn follow_up_request(conflict: &Conflict) -> GetRequest {
    let item = conflict
        .target_local_item
        .clone()
        .or_else(|| conflict.source_local_item.clone())
        .unwrap_or_else(|| conflict.your_server_item.clone());
    let version = if conflict.their_version != 0 {
        VersionSpec::Changeset(conflict.their_version)
    } else {
        VersionSpec::Changeset(1)
    };
    GetRequest {
        item,
        recursion: RecursionType::None,
        version,
    }
}
