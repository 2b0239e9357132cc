//! Conflict auto-resolution.
//!
//! The conflict subsystem is responsible for:
//! 1. **Policy** -- deciding which conflicts may be resolved without the user.
//! 2. **Merging** -- three-way merging content when both sides changed.
//! 3. **Handling** -- marking conflicts resolved and queuing follow-up gets.

pub mod diff;
pub mod handler;
pub mod merger;
pub mod policy;

pub use handler::{
    ConflictResolutionHandler, EventSink, RecordingEventSink, ResolutionEvent, TracingEventSink,
};
pub use merger::{ConflictMarker, MergeOptions, MergeOutcome, MergeSummary, ThreeWayMerge};
pub use policy::{
    AutoResolveDecision, AutoResolveOptions, AutoResolvePolicy, ChangeSummary,
    RenameEditPrecedence,
};
