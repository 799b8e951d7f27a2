use serde_json::Value;

/// Structured diagnostics callback: event name plus a JSON payload.
/// Injected at construction; the default discards everything, so the hot
/// path never builds payloads nobody reads.
pub type DiagnosticSink = Box<dyn FnMut(&'static str, Value) + Send>;

pub struct Diagnostics {
    sink: Option<DiagnosticSink>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::none()
    }
}

impl Diagnostics {
    pub fn none() -> Self {
        Self { sink: None }
    }

    pub fn with_sink(sink: DiagnosticSink) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Payloads are built lazily; `build` only runs when a sink is present.
    pub(crate) fn emit<F>(&mut self, event: &'static str, build: F)
    where
        F: FnOnce() -> Value,
    {
        if let Some(sink) = &mut self.sink {
            sink(event, build());
        }
    }
}
