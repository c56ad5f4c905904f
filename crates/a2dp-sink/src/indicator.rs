use a2dp_pipeline::status::StatusLed;

/// Status LED rendered into the trace log; only level changes are emitted.
#[derive(Default)]
pub struct LogLed {
    level: Option<bool>,
    transitions: u64,
}

impl StatusLed for LogLed {
    fn set(&mut self, on: bool) {
        if self.level == Some(on) {
            return;
        }
        self.level = Some(on);
        self.transitions += 1;
        tracing::trace!(on, transitions = self.transitions, "status led");
    }
}
