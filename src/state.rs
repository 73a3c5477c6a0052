use crate::error::panic_message;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Service lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ServiceState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Error = 4,
}

impl ServiceState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServiceState::Stopped,
            1 => ServiceState::Starting,
            2 => ServiceState::Running,
            3 => ServiceState::Stopping,
            _ => ServiceState::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Error => "error",
        }
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    ///
    /// The happy path is `Stopped -> Starting -> Running -> Stopping -> Stopped`.
    /// Any state may fail into `Error`, `Error` is left through an explicit
    /// stop, and a stop may interrupt a start that has not reached `Running`.
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        match (self, next) {
            (Error, Error) => false,
            (_, Error) => true,
            (Stopped, Starting)
            | (Starting, Running)
            | (Starting, Stopping)
            | (Running, Stopping)
            | (Stopping, Stopped)
            | (Error, Stopping)
            | (Error, Stopped) => true,
            _ => false,
        }
    }

    /// Terminal states a settled controller can rest in
    pub fn is_settled(&self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::Error)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked with `(old, new)` on every state change
pub type StateListener = Arc<dyn Fn(ServiceState, ServiceState) + Send + Sync>;

/// Atomic lifecycle state with compare-and-swap transitions
pub struct StateMachine {
    state: AtomicU8,
    listeners: RwLock<Vec<StateListener>>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ServiceState::Stopped as u8),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Unconditionally announce a new state, returning the previous one
    pub fn set_state(&self, new_state: ServiceState) -> ServiceState {
        let old_state = ServiceState::from_u8(self.state.swap(new_state as u8, Ordering::AcqRel));
        if old_state != new_state {
            debug!("Service state changed: {} -> {}", old_state, new_state);
            self.notify(old_state, new_state);
        }
        old_state
    }

    /// Move from `current` to `new_state` only if the state still equals
    /// `current` and the step is legal
    pub fn compare_and_swap(&self, current: ServiceState, new_state: ServiceState) -> bool {
        if !current.can_transition_to(new_state) {
            debug!("Rejected illegal transition: {} -> {}", current, new_state);
            return false;
        }

        let swapped = self
            .state
            .compare_exchange(
                current as u8,
                new_state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if swapped {
            debug!("Service state changed: {} -> {}", current, new_state);
            self.notify(current, new_state);
        }
        swapped
    }

    pub fn add_listener(&self, listener: StateListener) {
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn notify(&self, old_state: ServiceState, new_state: ServiceState) {
        let listeners = self.listeners.read().clone();

        for listener in listeners {
            let call = move || {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(old_state, new_state))) {
                    warn!(
                        "State listener panicked on {} -> {}: {}",
                        old_state,
                        new_state,
                        panic_message(payload.as_ref())
                    );
                }
            };

            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(call);
                }
                Err(_) => {
                    std::thread::spawn(call);
                }
            }
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[test]
    fn test_legal_transitions() {
        use ServiceState::*;

        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(Error.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Error));
        assert!(Stopped.can_transition_to(Error));

        assert!(!Stopped.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Stopping));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Error.can_transition_to(Running));
        assert!(!Error.can_transition_to(Error));
    }

    #[test]
    fn test_compare_and_swap() {
        let machine = StateMachine::new();
        assert_eq!(machine.state(), ServiceState::Stopped);

        assert!(machine.compare_and_swap(ServiceState::Stopped, ServiceState::Starting));
        assert_eq!(machine.state(), ServiceState::Starting);

        // Stale expectation fails
        assert!(!machine.compare_and_swap(ServiceState::Stopped, ServiceState::Starting));

        // Illegal step fails even when the current state matches
        assert!(!machine.compare_and_swap(ServiceState::Starting, ServiceState::Stopped));
        assert_eq!(machine.state(), ServiceState::Starting);
    }

    #[test]
    fn test_set_state_returns_previous() {
        let machine = StateMachine::new();
        assert_eq!(machine.set_state(ServiceState::Error), ServiceState::Stopped);
        assert_eq!(machine.set_state(ServiceState::Stopped), ServiceState::Error);
    }

    #[test]
    fn test_concurrent_cas_has_single_winner() {
        let machine = Arc::new(StateMachine::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let machine = Arc::clone(&machine);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if machine.compare_and_swap(ServiceState::Stopped, ServiceState::Starting) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(machine.state(), ServiceState::Starting);
    }

    #[tokio::test]
    async fn test_listeners_receive_transitions() {
        let machine = StateMachine::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        machine.add_listener(Arc::new(move |old, new| {
            let _ = tx.send((old, new));
        }));

        machine.compare_and_swap(ServiceState::Stopped, ServiceState::Starting);

        let change = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change, (ServiceState::Stopped, ServiceState::Starting));
    }

    #[tokio::test]
    async fn test_listener_panic_is_contained() {
        let machine = StateMachine::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        machine.add_listener(Arc::new(|_, _| panic!("listener failure")));
        machine.add_listener(Arc::new(move |_, new| {
            let _ = tx.send(new);
        }));

        machine.set_state(ServiceState::Error);

        let new_state = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(new_state, ServiceState::Error);
        assert_eq!(machine.state(), ServiceState::Error);
    }

    #[test]
    fn test_unchanged_state_does_not_notify() {
        let machine = StateMachine::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        machine.add_listener(Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        machine.set_state(ServiceState::Stopped);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
