//! Foreground/background visibility signal.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Whether the host process is interactive or backgrounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Interactive; poll aggressively.
    #[default]
    Foreground,
    /// Backgrounded; conserve resources.
    Background,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Foreground => f.write_str("foreground"),
            Visibility::Background => f.write_str("background"),
        }
    }
}

/// Publishes visibility transitions to the scheduler and recovery engine.
///
/// Backed by a [`watch`] channel: receivers only ever see the latest value,
/// and setting the current value again is not a transition.
#[derive(Clone, Debug)]
pub struct VisibilitySource {
    tx: Arc<watch::Sender<Visibility>>,
}

impl VisibilitySource {
    /// Creates a source with the given initial visibility.
    pub fn new(initial: Visibility) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Reports a visibility. Returns `true` if it was a transition.
    pub fn set(&self, visibility: Visibility) -> bool {
        self.tx.send_if_modified(|cur| {
            if *cur == visibility {
                false
            } else {
                *cur = visibility;
                true
            }
        })
    }

    /// Current visibility.
    pub fn current(&self) -> Visibility {
        *self.tx.borrow()
    }

    /// New receiver; the current value counts as already seen.
    pub fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }
}

impl Default for VisibilitySource {
    fn default() -> Self {
        Self::new(Visibility::Foreground)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_value_is_not_a_transition() {
        let src = VisibilitySource::default();
        let rx = src.subscribe();
        assert!(!src.set(Visibility::Foreground));
        assert!(!rx.has_changed().unwrap_or(true));
        assert!(src.set(Visibility::Background));
        assert!(rx.has_changed().unwrap_or(false));
        assert_eq!(src.current(), Visibility::Background);
    }
}
