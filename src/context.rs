//! Naming scope and shared services handed from parent to child.

use std::fmt;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::print::{PrintSink, TracingSink};
use crate::time::SuperdenseTime;

struct Shared {
    seed: u64,
    sink: Arc<dyn PrintSink>,
    max_micro_steps: Option<u64>,
}

/// Context a node is constructed in.
///
/// Carries the node's fully qualified name plus the services every node of
/// a run shares: the random seed, the print sink and the micro-step cap.
/// Contexts are cheap to clone; the shared part is reference counted.
#[derive(Clone)]
pub struct NodeContext {
    full_name: String,
    shared: Arc<Shared>,
}

impl NodeContext {
    /// Creates the context of a root node.
    pub fn new(
        name: impl Into<String>,
        seed: u64,
        sink: Arc<dyn PrintSink>,
        max_micro_steps: Option<u64>,
    ) -> Self {
        Self {
            full_name: name.into(),
            shared: Arc::new(Shared {
                seed,
                sink,
                max_micro_steps,
            }),
        }
    }

    /// A context with default services, used until a node is bound to a parent.
    pub fn detached(name: impl Into<String>) -> Self {
        Self::new(name, 0, Arc::new(TracingSink), None)
    }

    /// Context of a child named `name` inside this one.
    pub fn child(&self, name: &str) -> Self {
        Self {
            full_name: format!("{}.{}", self.full_name, name),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Dot-separated path from the root.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Last segment of the full name.
    pub fn name(&self) -> &str {
        self.full_name
            .rsplit('.')
            .next()
            .unwrap_or(self.full_name.as_str())
    }

    pub fn seed(&self) -> u64 {
        self.shared.seed
    }

    pub fn max_micro_steps(&self) -> Option<u64> {
        self.shared.max_micro_steps
    }

    pub fn sink(&self) -> &Arc<dyn PrintSink> {
        &self.shared.sink
    }

    /// Seed of this node's private random stream.
    ///
    /// Depends only on the run seed and the full name, so a node rebuilt
    /// under the same name replays the same stream.
    pub fn stream_seed(&self) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

        let hash = self
            .full_name
            .bytes()
            .fold(FNV_OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME));
        hash ^ self.shared.seed.rotate_left(32)
    }

    /// A fresh random stream for this node.
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.stream_seed())
    }

    pub fn print_event(&self, time: SuperdenseTime, event: &str) {
        self.shared.sink.event(time, &self.full_name, event);
    }

    pub fn print(&self, time: SuperdenseTime, text: &str) {
        self.shared.sink.print(time, &self.full_name, text);
    }
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("full_name", &self.full_name)
            .field("seed", &self.shared.seed)
            .field("max_micro_steps", &self.shared.max_micro_steps)
            .finish()
    }
}
