//! Tracer: an in-memory parent/child span recorder keyed off a context
//! value (spec §4.12). A pure data sink — no external exporter is implied;
//! that is the job of the out-of-scope observability layer named in §1.
//!
//! Built in the data-first style the reference gateway uses for its own
//! plain, builder-light structs, with a context-scoped "active span"
//! carried explicitly through [`SpanContext`] rather than ambient thread-
//! local state, so span parenting is visible at every call site.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
	Pending,
	Success,
	Error,
}

#[derive(Debug, Clone)]
pub struct SpanData {
	pub id: String,
	pub parent_id: Option<String>,
	pub name: String,
	pub span_type: String,
	pub start: Instant,
	pub duration: Option<Duration>,
	pub status: SpanStatus,
	pub error: Option<String>,
}

/// The in-memory store of every span recorded through one [`SpanContext`]
/// lineage. Cheap to clone (it's an `Arc`); share one instance across a
/// request's whole lifetime to get full parent/child nesting.
#[derive(Default)]
pub struct Recorder {
	spans: Mutex<HashMap<String, SpanData>>,
	order: Mutex<Vec<String>>,
}

impl Recorder {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	fn start(&self, name: String, span_type: String, parent_id: Option<String>) -> String {
		let id = Uuid::new_v4().to_string();
		let data = SpanData {
			id: id.clone(),
			parent_id,
			name,
			span_type,
			start: Instant::now(),
			duration: None,
			status: SpanStatus::Pending,
			error: None,
		};
		self.spans.lock().insert(id.clone(), data);
		self.order.lock().push(id.clone());
		id
	}

	fn set_error(&self, id: &str, message: String) {
		if let Some(span) = self.spans.lock().get_mut(id) {
			span.status = SpanStatus::Error;
			span.error = Some(message);
		}
	}

	fn end(&self, id: &str) {
		if let Some(span) = self.spans.lock().get_mut(id) {
			span.duration = Some(span.start.elapsed());
			if span.status == SpanStatus::Pending {
				span.status = SpanStatus::Success;
			}
		}
	}

	/// A defensive copy of every span recorded so far, in start order.
	pub fn spans(&self) -> Vec<SpanData> {
		let order = self.order.lock();
		let spans = self.spans.lock();
		order.iter().filter_map(|id| spans.get(id).cloned()).collect()
	}
}

/// Carries the active recorder (if any) and the id of the currently active
/// span, threaded explicitly through calls that start child spans.
#[derive(Clone, Default)]
pub struct SpanContext {
	recorder: Option<Arc<Recorder>>,
	active_span_id: Option<String>,
}

impl SpanContext {
	pub fn new() -> Self {
		Self::default()
	}

	/// A context backed by a real recorder; spans started from it are kept.
	pub fn with_recorder(recorder: Arc<Recorder>) -> Self {
		Self {
			recorder: Some(recorder),
			active_span_id: None,
		}
	}

	pub fn recorder(&self) -> Option<&Arc<Recorder>> {
		self.recorder.as_ref()
	}
}

/// A handle to a started span. Dropping it without calling [`Span::end`]
/// leaves the span `Pending` forever in the recorder — callers are expected
/// to always call `end`, typically via a scope guard at the call site.
pub struct Span {
	id: String,
	recorder: Option<Arc<Recorder>>,
}

impl Span {
	pub fn id(&self) -> &str {
		&self.id
	}

	/// Marks this span as failed. `end` will then record status `error`
	/// instead of promoting it to `success`.
	pub fn set_error(&self, message: impl Into<String>) {
		if let Some(recorder) = &self.recorder {
			recorder.set_error(&self.id, message.into());
		}
	}

	/// Stamps `duration = now - start` and promotes `pending -> success`
	/// unless [`Span::set_error`] was already called.
	pub fn end(self) {
		if let Some(recorder) = &self.recorder {
			recorder.end(&self.id);
		}
	}
}

/// Starts a new span, attached as a child of `ctx`'s currently active span
/// if one exists. Returns the context a callee should use (with this span
/// now active) and a handle to end it. If `ctx` carries no recorder, a
/// no-op span is returned that still functions (it can be ended and marked
/// errored) but records nothing.
pub fn start_span(ctx: &SpanContext, name: impl Into<String>, span_type: impl Into<String>) -> (SpanContext, Span) {
	match &ctx.recorder {
		Some(recorder) => {
			let id = recorder.start(name.into(), span_type.into(), ctx.active_span_id.clone());
			let child_ctx = SpanContext {
				recorder: Some(Arc::clone(recorder)),
				active_span_id: Some(id.clone()),
			};
			(
				child_ctx,
				Span {
					id,
					recorder: Some(Arc::clone(recorder)),
				},
			)
		},
		None => (
			ctx.clone(),
			Span {
				id: String::new(),
				recorder: None,
			},
		),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn p10_child_span_parent_id_matches_root() {
		let recorder = Recorder::new();
		let root_ctx = SpanContext::with_recorder(recorder.clone());
		let (child_ctx, root) = start_span(&root_ctx, "root", "operation");
		let (_, child) = start_span(&child_ctx, "child", "operation");

		let spans = recorder.spans();
		let child_data = spans.iter().find(|s| s.id == child.id()).unwrap();
		assert_eq!(child_data.parent_id.as_deref(), Some(root.id()));
	}

	#[test]
	fn p10_set_error_then_end_records_error_status() {
		let recorder = Recorder::new();
		let ctx = SpanContext::with_recorder(recorder.clone());
		let (_, span) = start_span(&ctx, "call", "upstream");
		let id = span.id().to_string();
		span.set_error("boom");
		span.end();

		let spans = recorder.spans();
		let data = spans.iter().find(|s| s.id == id).unwrap();
		assert_eq!(data.status, SpanStatus::Error);
		assert_eq!(data.error.as_deref(), Some("boom"));
		assert!(data.duration.is_some());
	}

	#[test]
	fn end_without_error_promotes_to_success() {
		let recorder = Recorder::new();
		let ctx = SpanContext::with_recorder(recorder.clone());
		let (_, span) = start_span(&ctx, "call", "upstream");
		let id = span.id().to_string();
		span.end();

		let spans = recorder.spans();
		let data = spans.iter().find(|s| s.id == id).unwrap();
		assert_eq!(data.status, SpanStatus::Success);
	}

	#[test]
	fn context_without_recorder_yields_functional_noop_span() {
		let ctx = SpanContext::new();
		let (child_ctx, span) = start_span(&ctx, "root", "operation");
		span.set_error("ignored");
		span.end();
		assert!(child_ctx.recorder().is_none());
	}

	#[test]
	fn get_spans_is_a_defensive_copy() {
		let recorder = Recorder::new();
		let ctx = SpanContext::with_recorder(recorder.clone());
		let (_, span) = start_span(&ctx, "a", "t");
		span.end();
		let mut first = recorder.spans();
		first.clear();
		assert_eq!(recorder.spans().len(), 1);
	}
}
