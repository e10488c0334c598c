//! Diagnostic sinks for node lifecycle notifications.
//!
//! The kernel reports every lifecycle event and every explicit `print` from
//! a node to a [`PrintSink`]. What happens with them is up to the sink: the
//! default forwards them to `tracing`, tests usually record them.

use parking_lot::Mutex;

use crate::time::SuperdenseTime;

/// Receives lifecycle notifications and node prints.
pub trait PrintSink: Send + Sync {
    /// A lifecycle event (`initialization`, `unplanned`, `planned`, `finalization`).
    fn event(&self, time: SuperdenseTime, full_name: &str, event: &str);

    /// Free-form text printed by a node.
    fn print(&self, time: SuperdenseTime, full_name: &str, text: &str);
}

/// Forwards notifications as `trace!` events on the `devskit::events` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl PrintSink for TracingSink {
    fn event(&self, time: SuperdenseTime, full_name: &str, event: &str) {
        tracing::trace!(target: "devskit::events", %time, node = full_name, event);
    }

    fn print(&self, time: SuperdenseTime, full_name: &str, text: &str) {
        tracing::trace!(target: "devskit::events", %time, node = full_name, "{}", text);
    }
}

/// Collects notifications as `"t|c|full_name$event"` lines.
///
/// Prints are recorded as `"t|c|full_name: text"`.
#[derive(Debug, Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Recorded lines whose node name equals `full_name`.
    pub fn lines_for(&self, full_name: &str) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|line| {
                line.splitn(3, '|')
                    .nth(2)
                    .map(|rest| {
                        rest.split(['$', ':'])
                            .next()
                            .is_some_and(|name| name == full_name)
                    })
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl PrintSink for RecordingSink {
    fn event(&self, time: SuperdenseTime, full_name: &str, event: &str) {
        self.lines.lock().push(format!("{}|{}${}", time, full_name, event));
    }

    fn print(&self, time: SuperdenseTime, full_name: &str, text: &str) {
        self.lines.lock().push(format!("{}|{}: {}", time, full_name, text));
    }
}
