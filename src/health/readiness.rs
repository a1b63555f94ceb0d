//! Process readiness flag.
//!
//! # States
//! - Starting: bootstrap in progress, health checks fail
//! - Ready: serving, health checks pass
//! - Draining: shutdown started, health checks fail
//!
//! # State Transitions
//! ```text
//! Starting → Ready     set(true) after bootstrap and serve loops launch
//! Starting → Draining  set(false)
//! Ready    → Draining  set(false), first shutdown step
//! Draining → *         never; set(true) is ignored
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Readiness state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Starting = 0,
    Ready = 1,
    Draining = 2,
}

impl From<u8> for ReadinessState {
    fn from(val: u8) -> Self {
        match val {
            1 => ReadinessState::Ready,
            2 => ReadinessState::Draining,
            _ => ReadinessState::Starting,
        }
    }
}

impl ReadinessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessState::Starting => "starting",
            ReadinessState::Ready => "ready",
            ReadinessState::Draining => "draining",
        }
    }
}

/// Shared readiness flag. Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct Readiness {
    state: Arc<AtomicU8>,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the flag.
    ///
    /// `true` only takes effect from `Starting`; once draining the process
    /// never reports ready again.
    pub fn set(&self, ready: bool) {
        if ready {
            match self.state.compare_exchange(
                ReadinessState::Starting as u8,
                ReadinessState::Ready as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    metrics::gauge!("gateway_ready").set(1.0);
                    tracing::info!("Readiness set: ready");
                }
                Err(current) => {
                    if ReadinessState::from(current) == ReadinessState::Draining {
                        tracing::warn!("Ignoring readiness after shutdown started");
                    }
                }
            }
        } else {
            let previous = self
                .state
                .swap(ReadinessState::Draining as u8, Ordering::AcqRel);
            if ReadinessState::from(previous) != ReadinessState::Draining {
                metrics::gauge!("gateway_ready").set(0.0);
                tracing::info!("Readiness set: draining");
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ReadinessState::Ready
    }

    pub fn state(&self) -> ReadinessState {
        ReadinessState::from(self.state.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_not_ready() {
        let readiness = Readiness::new();
        assert!(!readiness.is_ready());
        assert_eq!(readiness.state(), ReadinessState::Starting);
    }

    #[test]
    fn never_ready_again_after_draining() {
        let readiness = Readiness::new();
        readiness.set(true);
        assert!(readiness.is_ready());

        readiness.set(false);
        assert!(!readiness.is_ready());

        readiness.set(true);
        assert!(!readiness.is_ready());
        assert_eq!(readiness.state(), ReadinessState::Draining);
    }

    #[test]
    fn clones_share_state() {
        let readiness = Readiness::new();
        let observer = readiness.clone();
        readiness.set(true);
        assert!(observer.is_ready());
    }

    #[test]
    fn concurrent_readers_see_old_or_new_value() {
        let readiness = Readiness::new();
        readiness.set(true);

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let r = readiness.clone();
                thread::spawn(move || {
                    let mut seen_false = false;
                    for _ in 0..10_000 {
                        match r.state() {
                            ReadinessState::Ready => assert!(!seen_false, "went back to ready"),
                            ReadinessState::Draining => seen_false = true,
                            ReadinessState::Starting => panic!("torn read"),
                        }
                    }
                })
            })
            .collect();

        readiness.set(false);
        for reader in readers {
            reader.join().unwrap();
        }
        assert!(!readiness.is_ready());
    }
}
