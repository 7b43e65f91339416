use std::fmt;
use std::sync::Arc;

use crate::actor::behavior::{Behavior, BoxBehavior};

/// A cloneable behavior factory.
///
/// Restarts re-run the factory to replace a failed behavior with a
/// fresh instance at the same address, so the closure must capture
/// everything initialization needs.
#[derive(Clone)]
pub struct Props {
    producer: Arc<dyn Fn() -> BoxBehavior + Send + Sync>,
}

impl Props {
    pub fn new<B, F>(creator: F) -> Props
    where
        B: Behavior,
        F: Fn() -> B + Send + Sync + 'static,
    {
        Props {
            producer: Arc::new(move || Box::new(creator())),
        }
    }

    /// Factory taking cloneable arguments, captured once and cloned into
    /// every (re)start.
    pub fn new_args<B, F, Args>(creator: F, args: Args) -> Props
    where
        B: Behavior,
        Args: Clone + Send + Sync + 'static,
        F: Fn(Args) -> B + Send + Sync + 'static,
    {
        Props {
            producer: Arc::new(move || Box::new(creator(args.clone()))),
        }
    }

    pub(crate) fn produce(&self) -> BoxBehavior {
        (self.producer)()
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Props")
    }
}
