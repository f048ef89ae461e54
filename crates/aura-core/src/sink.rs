//! Fire-and-forget analytics sinks (ad pixels, tag managers).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::session::SessionToken;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedEvent {
    pub name: String,
    pub session: SessionToken,
    pub properties: Value,
    pub at: DateTime<Utc>,
}

impl TrackedEvent {
    pub fn new(name: impl Into<String>, session: &SessionToken, properties: Value) -> Self {
        Self {
            name: name.into(),
            session: session.clone(),
            properties,
            at: Utc::now(),
        }
    }
}

/// Receives every tracked funnel event. Must not block or fail the caller.
pub trait AnalyticsSink: Send + Sync {
    fn name(&self) -> &str;
    fn emit(&self, event: &TrackedEvent);
}

/// Forwards only the named events to the wrapped sink.
pub struct AllowList<S> {
    inner: S,
    allowed: HashSet<String>,
}

impl<S: AnalyticsSink> AllowList<S> {
    pub fn new<I, N>(inner: S, allowed: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self {
            inner,
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S: AnalyticsSink> AnalyticsSink for AllowList<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn emit(&self, event: &TrackedEvent) {
        if self.allowed.contains(&event.name) {
            self.inner.emit(event);
        }
    }
}

/// Logs each event under the `aura::analytics` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl AnalyticsSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn emit(&self, event: &TrackedEvent) {
        info!(
            target: "aura::analytics",
            event = %event.name,
            session = %event.session,
            properties = %event.properties,
            "funnel event"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<String>>>);

    impl AnalyticsSink for Capture {
        fn name(&self) -> &str {
            "capture"
        }

        fn emit(&self, event: &TrackedEvent) {
            self.0.lock().unwrap().push(event.name.clone());
        }
    }

    #[test]
    fn allow_list_drops_other_events() {
        let capture = Capture::default();
        let pixel = AllowList::new(capture.clone(), ["quiz_start"]);
        let session = SessionToken::generate();

        pixel.emit(&TrackedEvent::new("visit", &session, Value::Null));
        pixel.emit(&TrackedEvent::new("quiz_start", &session, Value::Null));
        pixel.emit(&TrackedEvent::new("lead_submitted", &session, Value::Null));

        assert_eq!(*capture.0.lock().unwrap(), vec!["quiz_start".to_string()]);
        assert_eq!(pixel.name(), "capture");
    }
}
