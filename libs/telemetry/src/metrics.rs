use metrics::{Label, counter, gauge};
use tracing::Span;

use crate::context::{SessionContext, TelemetryLabels};

const SESSION_SPAN_NAME: &str = "dispatch.session";

fn labels(labels: &TelemetryLabels) -> Vec<Label> {
    labels
        .tags()
        .into_iter()
        .map(|(k, v)| Label::new(k, v))
        .collect()
}

pub fn record_counter(name: &'static str, value: u64, labels_in: &TelemetryLabels) {
    counter!(name, labels(labels_in)).increment(value);
}

pub fn record_gauge(name: &'static str, value: f64, labels_in: &TelemetryLabels) {
    gauge!(name, labels(labels_in)).set(value);
}

pub fn with_common_fields(span: &Span, session_id: &str, target: Option<&str>) {
    span.record("session_id", tracing::field::display(session_id));
    if let Some(target) = target {
        span.record("target", tracing::field::display(target));
    }
}

/// Opens the span every dispatch task runs inside.
pub fn start_session_span(ctx: &SessionContext) -> Span {
    let span = tracing::info_span!(
        SESSION_SPAN_NAME,
        session_id = tracing::field::Empty,
        target = tracing::field::Empty
    );
    with_common_fields(&span, &ctx.session_id, Some(&ctx.target));
    span
}
