//! Relay invariants checked between simulation steps.
//!
//! Engine state is captured into a [`SystemSnapshot`]. State invariants
//! ([`Invariant`]) look at one snapshot; transition invariants
//! ([`TransitionInvariant`]) compare the snapshots on either side of a
//! single event.
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let before = SystemSnapshot::capture(relay.driver());
//! relay.request(session, payload, 1)?;
//! let after = SystemSnapshot::capture(relay.driver());
//! registry.check_step(&before, &after)?;
//! ```

mod checks;
mod snapshot;

pub use checks::{
    AppendOnlyHistory, AuthorHasRead, ExclusiveMembership, LiveConnections, LogContiguity,
    MembersOnline, PresenceConsistency,
};
pub use snapshot::{MessageSnapshot, RoomSnapshot, SystemSnapshot, UserSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property of a single engine snapshot.
pub trait Invariant: Send + Sync {
    /// Name used in violation reports.
    fn name(&self) -> &'static str;

    /// Checks `state`, reporting the first offending entity.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// A property relating the state before and after one operation.
pub trait TransitionInvariant: Send + Sync {
    /// Name used in violation reports.
    fn name(&self) -> &'static str;

    /// Check the step from `before` to `after`.
    fn check_transition(&self, before: &SystemSnapshot, after: &SystemSnapshot) -> InvariantResult;
}

/// Ordered set of state and transition invariants.
#[derive(Default)]
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
    transitions: Vec<Box<dyn TransitionInvariant>>,
}

impl InvariantRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every relay invariant:
    /// - [`PresenceConsistency`]: connected iff a connection is held
    /// - [`LiveConnections`]: held connections are active sessions
    /// - [`ExclusiveMembership`]: one room per user
    /// - [`MembersOnline`]: room members are online and in that room
    /// - [`LogContiguity`]: dense log indices, monotone timestamps
    /// - [`AuthorHasRead`]: authors are in `read_by`
    /// - [`AppendOnlyHistory`]: logs and read receipts only grow
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(PresenceConsistency);
        registry.add(LiveConnections);
        registry.add(ExclusiveMembership);
        registry.add(MembersOnline);
        registry.add(LogContiguity);
        registry.add(AuthorHasRead);
        registry.add_transition(AppendOnlyHistory);
        registry
    }

    /// Registers a state invariant.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Registers a transition invariant.
    pub fn add_transition<T: TransitionInvariant + 'static>(&mut self, invariant: T) {
        self.transitions.push(Box::new(invariant));
    }

    /// Runs the state invariants, collecting every violation.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check state invariants on `after` plus every transition invariant.
    pub fn check_step(
        &self,
        before: &SystemSnapshot,
        after: &SystemSnapshot,
    ) -> Result<(), Vec<Violation>> {
        let mut violations = self.check_all(after).err().unwrap_or_default();
        violations.extend(
            self.transitions.iter().filter_map(|inv| inv.check_transition(before, after).err()),
        );

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Number of registered invariants of both kinds.
    pub fn len(&self) -> usize {
        self.invariants.len() + self.transitions.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty() && self.transitions.is_empty()
    }
}
