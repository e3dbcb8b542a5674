//! Toggle state shared by every instance of a bar module
//!
//! Some modules (an idle inhibitor, a do-not-disturb switch) show one
//! process-wide on/off state no matter how many bars display them. The
//! state lives as long as at least one `ToggleMember` holds it; once the
//! last member is dropped, the next `acquire` starts over from its own
//! initial value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug)]
struct SharedToggle {
    active: watch::Sender<bool>,
    /// Bumped on every change so a pending timeout can tell it is stale
    generation: AtomicU64,
}

/// Hands out members of one shared toggle
#[derive(Debug)]
pub struct ToggleRegistry {
    slot: Mutex<Weak<SharedToggle>>,
}

impl Default for ToggleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToggleRegistry {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Weak::new()),
        }
    }

    /// Join the shared state, creating it with `initial` if nobody holds it
    pub fn acquire(&self, initial: bool) -> ToggleMember {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        let shared = match slot.upgrade() {
            Some(shared) => shared,
            None => {
                debug!(initial, "Creating shared toggle");
                let (active, _) = watch::channel(initial);
                let shared = Arc::new(SharedToggle {
                    active,
                    generation: AtomicU64::new(0),
                });
                *slot = Arc::downgrade(&shared);
                shared
            }
        };

        ToggleMember {
            changes: shared.active.subscribe(),
            shared,
        }
    }

    /// Number of live members
    pub fn members(&self) -> usize {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .strong_count()
    }
}

/// One holder of a shared toggle
#[derive(Debug)]
pub struct ToggleMember {
    shared: Arc<SharedToggle>,
    changes: watch::Receiver<bool>,
}

impl ToggleMember {
    pub fn is_active(&self) -> bool {
        *self.shared.active.borrow()
    }

    pub fn set(&self, active: bool) {
        let generation = &self.shared.generation;
        self.shared.active.send_modify(|value| {
            *value = active;
            generation.fetch_add(1, Ordering::SeqCst);
        });
    }

    /// Flip the state, returning the new value
    pub fn toggle(&self) -> bool {
        let generation = &self.shared.generation;
        let mut now = false;
        self.shared.active.send_modify(|value| {
            *value = !*value;
            now = *value;
            generation.fetch_add(1, Ordering::SeqCst);
        });
        now
    }

    /// Wait for a change made by any member, returning the new value
    pub async fn changed(&mut self) -> bool {
        // This member keeps the sender alive, so this cannot fail
        let _ = self.changes.changed().await;
        *self.changes.borrow_and_update()
    }

    /// Activate now and deactivate after `duration`
    ///
    /// Any change in the meantime, by any member, cancels the timeout. The
    /// timeout does not keep the shared state alive on its own.
    pub fn activate_for(&self, duration: Duration) {
        let generation = &self.shared.generation;
        let mut armed_at = 0;
        self.shared.active.send_modify(|value| {
            *value = true;
            armed_at = generation.fetch_add(1, Ordering::SeqCst) + 1;
        });

        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let generation = &shared.generation;
            shared.active.send_if_modified(|value| {
                if generation.load(Ordering::SeqCst) != armed_at {
                    return false;
                }
                info!("Deactivating shared toggle after timeout");
                *value = false;
                generation.fetch_add(1, Ordering::SeqCst);
                true
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_members_share_state() {
        let registry = ToggleRegistry::new();
        let a = registry.acquire(false);
        let b = registry.acquire(true);

        assert!(!b.is_active(), "second acquire joins the existing state");
        assert!(a.toggle());
        assert!(b.is_active());
        assert_eq!(registry.members(), 2);
    }

    #[test]
    fn test_state_recreated_after_last_member() {
        let registry = ToggleRegistry::new();

        let first = registry.acquire(false);
        first.set(true);
        drop(first);
        assert_eq!(registry.members(), 0);

        let fresh = registry.acquire(false);
        assert!(!fresh.is_active());
    }

    #[test]
    fn test_static_registry() {
        static REGISTRY: ToggleRegistry = ToggleRegistry::new();

        let member = REGISTRY.acquire(true);
        assert!(member.is_active());
    }

    #[tokio::test]
    async fn test_other_members_are_notified() {
        let registry = ToggleRegistry::new();
        let a = registry.acquire(false);
        let mut b = registry.acquire(false);

        a.set(true);
        assert!(b.changed().await);

        a.toggle();
        assert!(!b.changed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_for_times_out() {
        let registry = ToggleRegistry::new();
        let mut member = registry.acquire(false);

        member.activate_for(Duration::from_secs(60));
        assert!(member.is_active());
        assert!(member.changed().await);

        // Paused clock: sleeping auto-advances to the timer
        assert!(!member.changed().await);
        assert!(!member.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_cancels_timeout() {
        let registry = ToggleRegistry::new();
        let member = registry.acquire(false);

        member.activate_for(Duration::from_secs(60));
        member.toggle();
        member.toggle();
        assert!(member.is_active());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(member.is_active(), "stale timeout must not fire");
    }
}
