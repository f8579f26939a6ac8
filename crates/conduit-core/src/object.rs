//! Object identity and the lifecycle state machine.
//!
//! Every graph entity moves through
//! `Constructed → Initialized → Activated → Started → Stopped`, strictly in
//! that order, each step exactly once. [`advance`] enforces the ordering and
//! runs a `will_X` / `did_X` hook pair from [`LifecycleHooks`] around the
//! state change, so a variant can layer behaviour on a transition without
//! touching the guard logic.
//!
//! Nodes and graphs implement [`LifecycleHooks`] on their lock guards, so a
//! transition can only be requested by a thread that already holds the
//! object's lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a graph entity.
///
/// Assigned once at construction and never reused, so it can be read without
/// taking the object's lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Allocates the next identifier.
    pub fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric identifier.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Position of an object in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    /// Freshly built; nothing validated yet.
    Constructed,
    /// `init()` succeeded.
    Initialized,
    /// `activate()` succeeded; structure is frozen.
    Activated,
    /// `start()` succeeded; the object may execute.
    Started,
    /// `stop()` succeeded; terminal.
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Constructed => "constructed",
            Self::Initialized => "initialized",
            Self::Activated => "activated",
            Self::Started => "started",
            Self::Stopped => "stopped",
        })
    }
}

/// A lifecycle step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transition {
    /// `Constructed → Initialized`
    Init,
    /// `Initialized → Activated`
    Activate,
    /// `Activated → Started`
    Start,
    /// `Started → Stopped`
    Stop,
}

impl Transition {
    /// State an object must be in for this transition to apply.
    pub fn from_state(self) -> LifecycleState {
        match self {
            Self::Init => LifecycleState::Constructed,
            Self::Activate => LifecycleState::Initialized,
            Self::Start => LifecycleState::Activated,
            Self::Stop => LifecycleState::Started,
        }
    }

    /// State an object is in after this transition.
    pub fn to_state(self) -> LifecycleState {
        match self {
            Self::Init => LifecycleState::Initialized,
            Self::Activate => LifecycleState::Activated,
            Self::Start => LifecycleState::Started,
            Self::Stop => LifecycleState::Stopped,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Activate => "activate",
            Self::Start => "start",
            Self::Stop => "stop",
        })
    }
}

/// An object with a lifecycle and hooks around each transition.
///
/// Implementors expose their [`Lifecycle`] and may override any `will_X` /
/// `did_X` hook. A `will_X` error aborts the transition and leaves the state
/// untouched; `did_X` runs after the state has changed and cannot fail, so it
/// already observes the new state.
pub trait LifecycleHooks {
    /// The object's lifecycle flags.
    fn lifecycle(&self) -> &Lifecycle;
    /// Mutable access used by [`advance`].
    fn lifecycle_mut(&mut self) -> &mut Lifecycle;

    /// Before `Constructed → Initialized`.
    fn will_init(&mut self) -> Result<()> {
        Ok(())
    }
    /// After `Constructed → Initialized`.
    fn did_init(&mut self) {}
    /// Before `Initialized → Activated`.
    fn will_activate(&mut self) -> Result<()> {
        Ok(())
    }
    /// After `Initialized → Activated`.
    fn did_activate(&mut self) {}
    /// Before `Activated → Started`.
    fn will_start(&mut self) -> Result<()> {
        Ok(())
    }
    /// After `Activated → Started`.
    fn did_start(&mut self) {}
    /// Before `Started → Stopped`.
    fn will_stop(&mut self) -> Result<()> {
        Ok(())
    }
    /// After `Started → Stopped`.
    fn did_stop(&mut self) {}
}

/// Performs `transition` on `object`, running the matching hook pair around
/// the state change.
pub fn advance<H: LifecycleHooks + ?Sized>(
    object: &mut H,
    transition: Transition,
    description: &str,
) -> Result<()> {
    object.lifecycle().check(transition, description)?;
    match transition {
        Transition::Init => object.will_init()?,
        Transition::Activate => object.will_activate()?,
        Transition::Start => object.will_start()?,
        Transition::Stop => object.will_stop()?,
    }
    object.lifecycle_mut().state = transition.to_state();
    tracing::trace!(object = %description, state = %transition.to_state(), "lifecycle");
    match transition {
        Transition::Init => object.did_init(),
        Transition::Activate => object.did_activate(),
        Transition::Start => object.did_start(),
        Transition::Stop => object.did_stop(),
    }
    Ok(())
}

/// Monotonic lifecycle flags of one object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// A lifecycle in the `Constructed` state.
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Constructed,
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// True once `init()` has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.state >= LifecycleState::Initialized
    }

    /// True once `activate()` has succeeded. Implies [`is_initialized`](Self::is_initialized).
    pub fn is_activated(&self) -> bool {
        self.state >= LifecycleState::Activated
    }

    /// True while started and not yet stopped.
    pub fn is_running(&self) -> bool {
        self.state == LifecycleState::Started
    }

    /// True once `stop()` has succeeded.
    pub fn is_stopped(&self) -> bool {
        self.state == LifecycleState::Stopped
    }

    /// Checks that `transition` is legal from the current state.
    pub fn check(&self, transition: Transition, object: &str) -> Result<()> {
        if self.state == transition.from_state() {
            Ok(())
        } else {
            Err(Error::Lifecycle {
                object: object.to_string(),
                transition,
                state: self.state,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        lifecycle: Lifecycle,
        calls: Vec<&'static str>,
        refuse_start: bool,
    }

    impl LifecycleHooks for Recorder {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }
        fn lifecycle_mut(&mut self) -> &mut Lifecycle {
            &mut self.lifecycle
        }
        fn will_init(&mut self) -> Result<()> {
            self.calls.push("will_init");
            assert!(!self.lifecycle.is_initialized());
            Ok(())
        }
        fn did_init(&mut self) {
            self.calls.push("did_init");
            assert!(self.lifecycle.is_initialized());
        }
        fn will_start(&mut self) -> Result<()> {
            if self.refuse_start {
                return Err(Error::Hardware("device busy".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn transitions_follow_the_linear_order() {
        let mut obj = Recorder::default();
        for t in [
            Transition::Init,
            Transition::Activate,
            Transition::Start,
            Transition::Stop,
        ] {
            advance(&mut obj, t, "obj").unwrap();
            assert_eq!(obj.lifecycle.state(), t.to_state());
        }
        assert!(obj.lifecycle.is_stopped());
        assert!(obj.lifecycle.is_activated());
    }

    #[test]
    fn activate_before_init_fails() {
        let mut obj = Recorder::default();
        let err = advance(&mut obj, Transition::Activate, "obj").unwrap_err();
        assert!(err.is_lifecycle());
        assert_eq!(obj.lifecycle.state(), LifecycleState::Constructed);
    }

    #[test]
    fn repeated_transitions_fail() {
        let mut obj = Recorder::default();
        advance(&mut obj, Transition::Init, "obj").unwrap();
        assert!(advance(&mut obj, Transition::Init, "obj").is_err());
        advance(&mut obj, Transition::Activate, "obj").unwrap();
        assert!(advance(&mut obj, Transition::Activate, "obj").is_err());
        assert!(advance(&mut obj, Transition::Stop, "obj").is_err());
    }

    #[test]
    fn hooks_wrap_the_flag_flip() {
        let mut obj = Recorder::default();
        advance(&mut obj, Transition::Init, "obj").unwrap();
        assert_eq!(obj.calls, ["will_init", "did_init"]);
    }

    #[test]
    fn failing_will_hook_leaves_state_untouched() {
        let mut obj = Recorder {
            refuse_start: true,
            ..Recorder::default()
        };
        advance(&mut obj, Transition::Init, "obj").unwrap();
        advance(&mut obj, Transition::Activate, "obj").unwrap();
        assert!(advance(&mut obj, Transition::Start, "obj").is_err());
        assert_eq!(obj.lifecycle.state(), LifecycleState::Activated);
    }

    #[test]
    fn object_ids_are_unique() {
        let a = ObjectId::next();
        let b = ObjectId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }
}
