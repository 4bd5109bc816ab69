//! Conflict domain model.
//!
//! A conflict is a directional relationship between two leader-equivalent
//! principals: the initiator who declared it and the target. Everything
//! attached to it (ally rosters, pending invites, grace clocks, bypass
//! votes) is owned by the [`crate::store::WarStore`] and mutated only
//! through the methods here, which enforce the side-disjointness rules.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::principal::PrincipalId;

/// Which side of a conflict a principal stands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The declaring side.
    Initiator,
    /// The declared-upon side.
    Defender,
}

impl Side {
    /// The opposing side.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Initiator => Self::Defender,
            Self::Defender => Self::Initiator,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Defender => write!(f, "defender"),
        }
    }
}

/// Ordered identity of a conflict.
///
/// The reverse pair is a distinct, independently declarable conflict
/// slot; direction-agnostic matching is a store-level query concern.
/// The canonical text form `"<initiator>:<target>"` is what the
/// persistence adapter uses as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConflictKey {
    /// The declaring principal.
    pub initiator: PrincipalId,
    /// The declared-upon principal.
    pub target: PrincipalId,
}

impl ConflictKey {
    /// Creates a key for the ordered pair.
    #[must_use]
    pub const fn new(initiator: PrincipalId, target: PrincipalId) -> Self {
        Self { initiator, target }
    }

    /// The key of the opposite-direction conflict slot.
    #[must_use]
    pub const fn reversed(&self) -> Self {
        Self {
            initiator: self.target,
            target: self.initiator,
        }
    }

    /// Whether the principal is one of the two parties.
    #[must_use]
    pub fn involves(&self, principal: PrincipalId) -> bool {
        self.initiator == principal || self.target == principal
    }

    /// The side the principal occupies, if a party.
    #[must_use]
    pub fn side_of(&self, principal: PrincipalId) -> Option<Side> {
        if principal == self.initiator {
            Some(Side::Initiator)
        } else if principal == self.target {
            Some(Side::Defender)
        } else {
            None
        }
    }

    /// The opposing party, if the principal is a party.
    #[must_use]
    pub fn opponent_of(&self, principal: PrincipalId) -> Option<PrincipalId> {
        match self.side_of(principal)? {
            Side::Initiator => Some(self.target),
            Side::Defender => Some(self.initiator),
        }
    }

    /// The party standing on `side`.
    #[must_use]
    pub const fn party_on(&self, side: Side) -> PrincipalId {
        match side {
            Side::Initiator => self.initiator,
            Side::Defender => self.target,
        }
    }
}

impl fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.initiator, self.target)
    }
}

/// Failure to parse the canonical `"<initiator>:<target>"` form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConflictKeyParseError {
    /// No `:` separator in the input.
    #[error("conflict key is missing the ':' separator")]
    MissingSeparator,

    /// One of the halves is not a UUID.
    #[error("conflict key contains an invalid principal id: {0}")]
    BadPrincipal(String),
}

impl FromStr for ConflictKey {
    type Err = ConflictKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (initiator, target) = s
            .split_once(':')
            .ok_or(ConflictKeyParseError::MissingSeparator)?;
        let initiator = initiator
            .parse::<PrincipalId>()
            .map_err(|_| ConflictKeyParseError::BadPrincipal(initiator.to_string()))?;
        let target = target
            .parse::<PrincipalId>()
            .map_err(|_| ConflictKeyParseError::BadPrincipal(target.to_string()))?;
        Ok(Self::new(initiator, target))
    }
}

/// A pair of per-side principal sets (used for both the ally roster and
/// the pending-invite ledger). A principal appears on at most one side.
#[derive(Debug, Default, Clone)]
struct SideSets {
    initiator_side: HashSet<PrincipalId>,
    defender_side: HashSet<PrincipalId>,
}

impl SideSets {
    fn set(&self, side: Side) -> &HashSet<PrincipalId> {
        match side {
            Side::Initiator => &self.initiator_side,
            Side::Defender => &self.defender_side,
        }
    }

    fn set_mut(&mut self, side: Side) -> &mut HashSet<PrincipalId> {
        match side {
            Side::Initiator => &mut self.initiator_side,
            Side::Defender => &mut self.defender_side,
        }
    }

    fn side_of(&self, principal: PrincipalId) -> Option<Side> {
        if self.initiator_side.contains(&principal) {
            Some(Side::Initiator)
        } else if self.defender_side.contains(&principal) {
            Some(Side::Defender)
        } else {
            None
        }
    }

    fn contains(&self, principal: PrincipalId) -> bool {
        self.side_of(principal).is_some()
    }

    /// Inserts on `side` unless the principal is already present on
    /// either side.
    fn insert(&mut self, side: Side, principal: PrincipalId) -> bool {
        if self.contains(principal) {
            return false;
        }
        self.set_mut(side).insert(principal)
    }

    fn remove(&mut self, principal: PrincipalId) -> Option<Side> {
        let side = self.side_of(principal)?;
        self.set_mut(side).remove(&principal);
        Some(side)
    }

    fn sorted(&self, side: Side) -> Vec<PrincipalId> {
        let mut members: Vec<_> = self.set(side).iter().copied().collect();
        members.sort();
        members
    }
}

/// Outcome of a grace-bypass vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BypassStatus {
    /// The vote was recorded; the counterpart has not voted yet.
    Recorded,
    /// Both parties agreed and the bypass is now active.
    Activated,
    /// The bypass was already active before this vote.
    AlreadyActive,
    /// The requester had already cast this vote.
    AlreadyVoted,
    /// Both parties agreed but the grant could not be applied; the votes
    /// stand and re-issuing the request retries the grant.
    BothAgreedGrantFailed,
}

impl fmt::Display for BypassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recorded => write!(f, "vote recorded, waiting on the other party"),
            Self::Activated => write!(f, "both parties agreed, bypass active"),
            Self::AlreadyActive => write!(f, "bypass already active"),
            Self::AlreadyVoted => write!(f, "vote already cast"),
            Self::BothAgreedGrantFailed => {
                write!(f, "both parties agreed but the grant failed, retry later")
            }
        }
    }
}

/// A live conflict and all state attached to it.
#[derive(Debug, Clone)]
pub struct Conflict {
    key: ConflictKey,
    declared_at: DateTime<Utc>,
    bypass_applied: bool,
    bypass_votes: HashSet<PrincipalId>,
    allies: SideSets,
    pending: SideSets,
    /// `None` value = ally registered but never seen online, so their
    /// personal grace has not started. Once set, never reset.
    ally_grace: HashMap<PrincipalId, Option<DateTime<Utc>>>,
    granted_allies: HashSet<PrincipalId>,
}

impl Conflict {
    /// Creates a freshly declared conflict with empty attachments.
    #[must_use]
    pub fn declared(key: ConflictKey, declared_at: DateTime<Utc>) -> Self {
        Self {
            key,
            declared_at,
            bypass_applied: false,
            bypass_votes: HashSet::new(),
            allies: SideSets::default(),
            pending: SideSets::default(),
            ally_grace: HashMap::new(),
            granted_allies: HashSet::new(),
        }
    }

    /// The conflict's ordered key.
    #[must_use]
    pub const fn key(&self) -> ConflictKey {
        self.key
    }

    /// When the conflict was declared (possibly re-pointed by a
    /// consensus grace collapse).
    #[must_use]
    pub const fn declared_at(&self) -> DateTime<Utc> {
        self.declared_at
    }

    /// Whether the leader-level bypass has been applied.
    #[must_use]
    pub const fn bypass_applied(&self) -> bool {
        self.bypass_applied
    }

    /// Marks the leader-level bypass as applied.
    pub fn mark_bypass_applied(&mut self) {
        self.bypass_applied = true;
    }

    /// Whether the declaration grace period has fully elapsed at `now`.
    #[must_use]
    pub fn grace_elapsed(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        now - self.declared_at >= grace
    }

    /// Remaining grace at `now`, floored at zero.
    #[must_use]
    pub fn grace_remaining(&self, now: DateTime<Utc>, grace: Duration) -> Duration {
        let remaining = grace - (now - self.declared_at);
        remaining.max(Duration::zero())
    }

    /// Re-points `declared_at` so that the grace period is already over
    /// at `now`. Used by the two-party consensus bypass.
    pub fn collapse_grace(&mut self, now: DateTime<Utc>, grace: Duration) {
        self.declared_at = now - grace;
    }

    /// Records a bypass vote. Returns false if the principal had
    /// already voted.
    pub fn record_vote(&mut self, principal: PrincipalId) -> bool {
        self.bypass_votes.insert(principal)
    }

    /// Whether both parties have voted for the bypass.
    #[must_use]
    pub fn votes_complete(&self) -> bool {
        self.bypass_votes.contains(&self.key.initiator) && self.bypass_votes.contains(&self.key.target)
    }

    /// Drops all in-flight bypass votes.
    pub fn clear_votes(&mut self) {
        self.bypass_votes.clear();
    }

    /// Registers a confirmed ally on `side` with an unset grace clock.
    ///
    /// Rejects the conflict's own parties and principals already present
    /// as allies on either side.
    pub fn register_ally(&mut self, side: Side, principal: PrincipalId) -> bool {
        if self.key.involves(principal) {
            return false;
        }
        if !self.allies.insert(side, principal) {
            return false;
        }
        self.ally_grace.entry(principal).or_insert(None);
        true
    }

    /// Adds a proposed ally to `side`'s pending set.
    ///
    /// No-op for parties, existing allies, and already-pending
    /// principals.
    pub fn invite(&mut self, side: Side, principal: PrincipalId) -> bool {
        if self.key.involves(principal) || self.allies.contains(principal) {
            return false;
        }
        self.pending.insert(side, principal)
    }

    /// Moves a pending principal into the ally roster, returning the
    /// side joined. The move is atomic: the principal leaves the pending
    /// set and gains a grace entry in the same call.
    pub fn accept_invite(&mut self, principal: PrincipalId) -> Option<Side> {
        let side = self.pending.remove(principal)?;
        // A stale invite for someone who became an ally through another
        // path still gets consumed, without double-registering.
        self.allies.insert(side, principal);
        self.ally_grace.entry(principal).or_insert(None);
        Some(side)
    }

    /// The side the principal fights on as an ally, if any.
    #[must_use]
    pub fn ally_side_of(&self, principal: PrincipalId) -> Option<Side> {
        self.allies.side_of(principal)
    }

    /// Whether the principal is a confirmed ally of either side.
    #[must_use]
    pub fn is_ally(&self, principal: PrincipalId) -> bool {
        self.allies.contains(principal)
    }

    /// Whether the principal has a pending invite on either side.
    #[must_use]
    pub fn is_pending(&self, principal: PrincipalId) -> bool {
        self.pending.contains(principal)
    }

    /// Starts the ally's personal grace clock if it has not started.
    /// Returns true when the clock was started by this call.
    pub fn start_ally_grace(&mut self, principal: PrincipalId, now: DateTime<Utc>) -> bool {
        match self.ally_grace.get_mut(&principal) {
            Some(slot) if slot.is_none() => {
                *slot = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Whether the ally's personal grace has started and elapsed.
    #[must_use]
    pub fn ally_grace_over(
        &self,
        principal: PrincipalId,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> bool {
        match self.ally_grace.get(&principal) {
            Some(Some(started)) => now - *started >= grace,
            _ => false,
        }
    }

    /// Whether the ally's grace clock is still unset.
    #[must_use]
    pub fn ally_grace_unset(&self, principal: PrincipalId) -> bool {
        matches!(self.ally_grace.get(&principal), Some(None))
    }

    /// Whether this ally has already received their privilege grant.
    #[must_use]
    pub fn ally_granted(&self, principal: PrincipalId) -> bool {
        self.granted_allies.contains(&principal)
    }

    /// Records a successful ally grant so it is never re-attempted.
    pub fn record_ally_grant(&mut self, principal: PrincipalId) -> bool {
        self.granted_allies.insert(principal)
    }

    /// Confirmed allies on `side`, sorted for stable output.
    #[must_use]
    pub fn allies_on(&self, side: Side) -> Vec<PrincipalId> {
        self.allies.sorted(side)
    }

    /// Pending invites on `side`, sorted for stable output.
    #[must_use]
    pub fn pending_on(&self, side: Side) -> Vec<PrincipalId> {
        self.pending.sorted(side)
    }

    /// Builds the read-only view handed out by status queries.
    #[must_use]
    pub fn view(&self, now: DateTime<Utc>, grace: Duration) -> ConflictView {
        let mut privileged: Vec<_> = self.granted_allies.iter().copied().collect();
        privileged.sort();
        ConflictView {
            initiator: self.key.initiator,
            target: self.key.target,
            declared_at: self.declared_at,
            grace_remaining_ms: self.grace_remaining(now, grace).num_milliseconds(),
            bypass_applied: self.bypass_applied,
            initiator_allies: self.allies.sorted(Side::Initiator),
            defender_allies: self.allies.sorted(Side::Defender),
            pending_initiator_allies: self.pending.sorted(Side::Initiator),
            pending_defender_allies: self.pending.sorted(Side::Defender),
            privileged_allies: privileged,
        }
    }
}

/// Read-only projection of a conflict for status display.
///
/// This is the query surface: callers never see the live structures.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictView {
    /// The declaring principal.
    pub initiator: PrincipalId,
    /// The declared-upon principal.
    pub target: PrincipalId,
    /// Declaration time (after any consensus grace collapse).
    pub declared_at: DateTime<Utc>,
    /// Milliseconds of declaration grace left; zero once elapsed.
    pub grace_remaining_ms: i64,
    /// Whether the leader-level bypass is active.
    pub bypass_applied: bool,
    /// Confirmed allies of the declaring side.
    pub initiator_allies: Vec<PrincipalId>,
    /// Confirmed allies of the defending side.
    pub defender_allies: Vec<PrincipalId>,
    /// Invited-but-unconfirmed principals of the declaring side.
    pub pending_initiator_allies: Vec<PrincipalId>,
    /// Invited-but-unconfirmed principals of the defending side.
    pub pending_defender_allies: Vec<PrincipalId>,
    /// Allies whose own grace has elapsed and whose grant succeeded.
    pub privileged_allies: Vec<PrincipalId>,
}

impl ConflictView {
    /// Whether the view involves the principal as a party.
    #[must_use]
    pub fn involves(&self, principal: PrincipalId) -> bool {
        self.initiator == principal || self.target == principal
    }
}
