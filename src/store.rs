//! The conflict store: single source of truth for all conflict state.
//!
//! Every mutating command runs synchronously against this store and
//! leaves it internally consistent even when the privilege gateway is
//! down: state is mutated first, external calls are best-effort, and a
//! snapshot write follows every durable transition before the command
//! returns. The host serializes commands, the tick driver, and the
//! reconcile worker through one lock around the store (see
//! [`crate::runtime`]).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::conflict::{BypassStatus, Conflict, ConflictKey, ConflictView, Side};
use crate::error::{ConflictError, WarError, WarResult};
use crate::gateway::PrivilegeGateway;
use crate::oracle::IdentityOracle;
use crate::persist::{ConflictSeed, SnapshotArchive};
use crate::principal::PrincipalId;

/// Store configuration.
#[derive(Debug, Clone, Copy)]
pub struct WarConfig {
    /// Declaration grace period for the two leader parties.
    pub grace: Duration,
    /// Personal grace period served by each ally, counted from their
    /// first login after joining.
    pub ally_grace: Duration,
}

impl Default for WarConfig {
    fn default() -> Self {
        Self {
            grace: Duration::hours(1),
            ally_grace: Duration::hours(1),
        }
    }
}

impl WarConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    /// [`WarError::Config`] when either grace duration is not positive.
    pub fn validate(self) -> WarResult<Self> {
        if self.grace <= Duration::zero() {
            return Err(WarError::Config {
                message: format!(
                    "grace must be positive (got {}ms)",
                    self.grace.num_milliseconds()
                ),
            });
        }
        if self.ally_grace <= Duration::zero() {
            return Err(WarError::Config {
                message: format!(
                    "ally_grace must be positive (got {}ms)",
                    self.ally_grace.num_milliseconds()
                ),
            });
        }
        Ok(self)
    }
}

/// Authoritative in-memory conflict state plus its injected
/// collaborators.
///
/// Mutators take `&mut self` so the single-writer rule is enforced by
/// whatever lock the host wraps the store in.
pub struct WarStore {
    config: WarConfig,
    clock: Arc<dyn Clock>,
    oracle: Arc<dyn IdentityOracle>,
    gateway: Arc<dyn PrivilegeGateway>,
    archive: Arc<dyn SnapshotArchive>,
    conflicts: HashMap<ConflictKey, Conflict>,
}

impl WarStore {
    /// Opens a store: validates the configuration and restores any
    /// persisted conflict set from the archive.
    ///
    /// A corrupt or unreadable snapshot is logged and replaced by an
    /// empty state; this subsystem favors availability over refusing to
    /// start.
    ///
    /// # Errors
    /// [`WarError::Config`] when the configuration is invalid.
    pub fn open(
        config: WarConfig,
        clock: Arc<dyn Clock>,
        oracle: Arc<dyn IdentityOracle>,
        gateway: Arc<dyn PrivilegeGateway>,
        archive: Arc<dyn SnapshotArchive>,
    ) -> WarResult<Self> {
        let config = config.validate()?;
        let mut store = Self {
            config,
            clock,
            oracle,
            gateway,
            archive,
            conflicts: HashMap::new(),
        };
        store.restore();
        Ok(store)
    }

    fn restore(&mut self) {
        let now = self.clock.now();
        match self.archive.load(now, self.config.grace) {
            Ok(Some(seeds)) => {
                for ConflictSeed { key, declared_at } in seeds {
                    self.conflicts
                        .insert(key, Conflict::declared(key, declared_at));
                }
                info!(count = self.conflicts.len(), "restored conflicts from snapshot");
            }
            Ok(None) => debug!("no conflict snapshot found, starting fresh"),
            Err(e) => {
                error!(error = %e, "conflict snapshot unreadable, starting with empty state");
            }
        }
    }

    /// Writes the durable subset of the current state. Failures are
    /// logged, never propagated: the in-memory store stays
    /// authoritative and the next successful write carries everything.
    fn persist(&self) {
        let seeds: Vec<ConflictSeed> = self
            .conflicts
            .values()
            .map(|c| ConflictSeed {
                key: c.key(),
                declared_at: c.declared_at(),
            })
            .collect();
        if let Err(e) = self.archive.save(&seeds) {
            warn!(error = %e, "snapshot write failed; in-memory state remains authoritative");
        }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &WarConfig {
        &self.config
    }

    /// Declares a conflict from `initiator` against `target`.
    ///
    /// Preconditions are checked in order, first failure wins: target
    /// resolvable, initiator leader, target leader, not self, no
    /// existing conflict for this ordered pair. On success the conflict
    /// is persisted and faction members of both sides are
    /// auto-registered: non-leaders join the ally roster immediately
    /// (grace unstarted), leader-equivalents only receive a pending
    /// invite and must opt in themselves.
    ///
    /// # Errors
    /// See [`ConflictError`].
    pub fn declare(
        &mut self,
        initiator: PrincipalId,
        target: PrincipalId,
    ) -> Result<(), ConflictError> {
        if !self.oracle.is_known(target) {
            return Err(ConflictError::PrincipalUnresolvable { principal: target });
        }
        if !self.oracle.is_leader(initiator) {
            return Err(ConflictError::NotLeader { principal: initiator });
        }
        if !self.oracle.is_leader(target) {
            return Err(ConflictError::NotLeader { principal: target });
        }
        if initiator == target {
            return Err(ConflictError::SelfConflict);
        }
        let key = ConflictKey::new(initiator, target);
        if self.conflicts.contains_key(&key) {
            return Err(ConflictError::AlreadyAtWar { target });
        }

        let now = self.clock.now();
        self.conflicts.insert(key, Conflict::declared(key, now));
        self.persist();
        self.auto_register_members(key);
        info!(%key, "conflict declared");
        Ok(())
    }

    /// Auto-registers the faction members of both parties. A second
    /// leader in a faction is never silently armed: they go to the
    /// pending set and must opt in.
    fn auto_register_members(&mut self, key: ConflictKey) {
        let oracle = Arc::clone(&self.oracle);
        let mut recruits: Vec<(Side, PrincipalId, bool)> = Vec::new();
        for side in [Side::Initiator, Side::Defender] {
            let leader = key.party_on(side);
            let Some(faction) = oracle.faction_of(leader) else {
                continue;
            };
            for member in oracle.members_of(&faction) {
                if key.involves(member) {
                    continue;
                }
                recruits.push((side, member, oracle.is_leader(member)));
            }
        }

        let Some(conflict) = self.conflicts.get_mut(&key) else {
            return;
        };
        for (side, member, is_leader) in recruits {
            if is_leader {
                conflict.invite(side, member);
            } else {
                conflict.register_ally(side, member);
            }
        }
    }

    /// Ends the conflict declared by `initiator` against `target`.
    ///
    /// Removes all attached state, then best-effort revokes bypass for
    /// both parties (failures are logged, not fatal), then persists.
    ///
    /// # Errors
    /// [`ConflictError::NoSuchConflict`] when this exact direction was
    /// never declared.
    pub fn end(
        &mut self,
        initiator: PrincipalId,
        target: PrincipalId,
    ) -> Result<(), ConflictError> {
        let key = ConflictKey::new(initiator, target);
        if self.conflicts.remove(&key).is_none() {
            return Err(ConflictError::NoSuchConflict);
        }
        for principal in [initiator, target] {
            if !self.gateway.revoke_bypass(principal) {
                warn!(
                    %principal,
                    "bypass revoke failed; protection stays off until the principal is reachable"
                );
            }
        }
        self.persist();
        info!(%key, "conflict ended");
        Ok(())
    }

    /// Casts `requester`'s vote to skip the remaining grace of their
    /// conflict with `counterpart` (either direction). Bypass activates
    /// only when both parties have voted and the gateway accepts the
    /// grant for both.
    ///
    /// A grant failure after full consensus leaves the votes standing,
    /// so re-issuing the request retries the grant without another
    /// round of agreement.
    ///
    /// # Errors
    /// [`ConflictError::NoSuchConflict`] when the two principals are
    /// not in conflict in either direction.
    pub fn request_bypass(
        &mut self,
        requester: PrincipalId,
        counterpart: PrincipalId,
    ) -> Result<BypassStatus, ConflictError> {
        let key = self
            .resolve_key(requester, counterpart)
            .ok_or(ConflictError::NoSuchConflict)?;
        let now = self.clock.now();
        let grace = self.config.grace;
        let gateway = Arc::clone(&self.gateway);

        let Some(conflict) = self.conflicts.get_mut(&key) else {
            return Err(ConflictError::NoSuchConflict);
        };
        if conflict.bypass_applied() {
            return Ok(BypassStatus::AlreadyActive);
        }
        let newly_voted = conflict.record_vote(requester);
        if !conflict.votes_complete() {
            if newly_voted {
                debug!(%key, %requester, "bypass vote recorded");
                return Ok(BypassStatus::Recorded);
            }
            return Ok(BypassStatus::AlreadyVoted);
        }

        // Both parties agreed (possibly on an earlier, failed attempt).
        // The grant is attempted for both sides regardless of individual
        // failures so a later retry has less left to do.
        let initiator_granted = gateway.grant_bypass(key.initiator);
        let target_granted = gateway.grant_bypass(key.target);
        if !(initiator_granted && target_granted) {
            warn!(%key, "both parties agreed but the bypass grant failed");
            return Ok(BypassStatus::BothAgreedGrantFailed);
        }

        conflict.mark_bypass_applied();
        conflict.collapse_grace(now, grace);
        conflict.clear_votes();
        self.persist();
        self.cascade_ally_grants(key);
        info!(%key, "grace bypass activated by consensus");
        Ok(BypassStatus::Activated)
    }

    /// Proposes `candidate` as an ally of every conflict where `leader`
    /// is a party, on the leader's side. Idempotent; returns the number
    /// of conflicts affected. Candidates always confirm via
    /// [`WarStore::opt_in`]; an invite alone grants nothing.
    pub fn invite_ally(&mut self, leader: PrincipalId, candidate: PrincipalId) -> usize {
        let keys: Vec<ConflictKey> = self
            .conflicts
            .keys()
            .filter(|k| k.involves(leader))
            .copied()
            .collect();

        let mut affected = 0;
        for key in keys {
            let Some(side) = key.side_of(leader) else {
                continue;
            };
            let Some(conflict) = self.conflicts.get_mut(&key) else {
                continue;
            };
            if conflict.invite(side, candidate) {
                affected += 1;
            }
        }
        if affected > 0 {
            debug!(%leader, %candidate, conflicts = affected, "ally invited");
        }
        affected
    }

    /// Confirms every pending invite held by `ally`, moving them into
    /// the matching roster and starting (or confirming) their personal
    /// grace clock now. Returns the number of conflicts joined.
    pub fn opt_in(&mut self, ally: PrincipalId) -> usize {
        let now = self.clock.now();
        let mut joined = 0;
        for conflict in self.conflicts.values_mut() {
            if conflict.accept_invite(ally).is_some() {
                conflict.start_ally_grace(ally, now);
                joined += 1;
            }
        }
        if joined > 0 {
            self.persist();
            info!(%ally, conflicts = joined, "ally opted in");
        }
        joined
    }

    /// Idempotent login re-sync hook.
    ///
    /// For each conflict where the principal is a party and grace has
    /// elapsed, the leader grant is retried (covers grants that failed
    /// while offline) and the ally cascade re-runs. For each conflict
    /// where the principal is an ally with an unstarted grace clock,
    /// the clock starts now: ally grace accrues from first login after
    /// joining, not from joining itself.
    pub fn on_principal_login(&mut self, principal: PrincipalId) {
        let now = self.clock.now();

        let party_keys: Vec<ConflictKey> = self
            .conflicts
            .keys()
            .filter(|k| k.involves(principal))
            .copied()
            .collect();
        for key in party_keys {
            self.retry_party_grant(key);
        }

        for conflict in self.conflicts.values_mut() {
            if conflict.ally_side_of(principal).is_some()
                && conflict.start_ally_grace(principal, now)
            {
                debug!(key = %conflict.key(), ally = %principal, "ally grace started on login");
            }
        }
    }

    /// Re-issues the leader grant for a conflict whose grace is over.
    /// The grant is idempotent on the gateway side, so a party coming
    /// online after activation simply gets theirs re-applied.
    fn retry_party_grant(&mut self, key: ConflictKey) {
        let now = self.clock.now();
        let grace = self.config.grace;
        let gateway = Arc::clone(&self.gateway);

        let mut newly_applied = false;
        {
            let Some(conflict) = self.conflicts.get_mut(&key) else {
                return;
            };
            if !conflict.grace_elapsed(now, grace) {
                return;
            }
            let initiator_granted = gateway.grant_bypass(key.initiator);
            let target_granted = gateway.grant_bypass(key.target);
            if initiator_granted && target_granted && !conflict.bypass_applied() {
                conflict.mark_bypass_applied();
                newly_applied = true;
            }
        }
        if newly_applied {
            self.persist();
            info!(%key, "bypass activated on login");
        }
        self.cascade_ally_grants(key);
    }

    /// Grants privileges to every ally of the conflict whose personal
    /// grace is served, once each. Allies whose grant fails (offline)
    /// are retried on later ticks; allies already granted are skipped.
    fn cascade_ally_grants(&mut self, key: ConflictKey) {
        let now = self.clock.now();
        let grace = self.config.grace;
        let ally_grace = self.config.ally_grace;
        let gateway = Arc::clone(&self.gateway);

        let Some(conflict) = self.conflicts.get_mut(&key) else {
            return;
        };
        if !conflict.grace_elapsed(now, grace) {
            return;
        }
        for side in [Side::Initiator, Side::Defender] {
            for ally in conflict.allies_on(side) {
                if conflict.ally_granted(ally) {
                    continue;
                }
                if !conflict.ally_grace_over(ally, now, ally_grace) {
                    continue;
                }
                if gateway.grant_bypass(ally) {
                    conflict.record_ally_grant(ally);
                    info!(%key, %ally, "ally privileges granted");
                } else {
                    debug!(%key, %ally, "ally grant failed, retrying on a later tick");
                }
            }
        }
    }

    /// One pass of the tick driver.
    ///
    /// For every live conflict whose grace has elapsed: attempt the
    /// leader grant if not yet applied (this is the retry path for
    /// parties who were offline when grace ran out), then cascade to
    /// ally grants. Conflicts with bypass already applied still cascade
    /// so allies who joined or logged in later get picked up.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        let grace = self.config.grace;
        let gateway = Arc::clone(&self.gateway);

        let keys: Vec<ConflictKey> = self.conflicts.keys().copied().collect();
        for key in keys {
            let mut newly_applied = false;
            {
                let Some(conflict) = self.conflicts.get_mut(&key) else {
                    continue;
                };
                if !conflict.grace_elapsed(now, grace) {
                    continue;
                }
                if !conflict.bypass_applied() {
                    let initiator_granted = gateway.grant_bypass(key.initiator);
                    let target_granted = gateway.grant_bypass(key.target);
                    if !(initiator_granted && target_granted) {
                        // A party is unreachable; the next tick retries.
                        continue;
                    }
                    conflict.mark_bypass_applied();
                    newly_applied = true;
                }
            }
            if newly_applied {
                self.persist();
                info!(%key, "grace elapsed, bypass activated");
            }
            self.cascade_ally_grants(key);
        }
    }

    fn resolve_key(&self, a: PrincipalId, b: PrincipalId) -> Option<ConflictKey> {
        let direct = ConflictKey::new(a, b);
        if self.conflicts.contains_key(&direct) {
            return Some(direct);
        }
        let reverse = direct.reversed();
        self.conflicts.contains_key(&reverse).then_some(reverse)
    }

    /// Whether the two principals are in conflict, in either direction.
    #[must_use]
    pub fn is_in_conflict(&self, a: PrincipalId, b: PrincipalId) -> bool {
        self.resolve_key(a, b).is_some()
    }

    /// Whether the two principals are in conflict with the leader-level
    /// bypass active, in either direction.
    #[must_use]
    pub fn is_bypass_active(&self, a: PrincipalId, b: PrincipalId) -> bool {
        self.resolve_key(a, b)
            .and_then(|key| self.conflicts.get(&key))
            .is_some_and(Conflict::bypass_applied)
    }

    /// Whether the principal is a party to any live conflict.
    #[must_use]
    pub fn is_involved(&self, principal: PrincipalId) -> bool {
        self.conflicts.keys().any(|k| k.involves(principal))
    }

    /// Oracle passthrough for callers that gate on rank (the command
    /// layer's invite gate) without holding their own oracle handle.
    #[must_use]
    pub fn is_leader_equivalent(&self, principal: PrincipalId) -> bool {
        self.oracle.is_leader(principal)
    }

    /// Views of every conflict the principal is a party to.
    #[must_use]
    pub fn list_conflicts_for(&self, principal: PrincipalId) -> Vec<ConflictView> {
        let now = self.clock.now();
        let mut views: Vec<ConflictView> = self
            .conflicts
            .values()
            .filter(|c| c.key().involves(principal))
            .map(|c| c.view(now, self.config.grace))
            .collect();
        views.sort_by_key(|v| (v.initiator, v.target));
        views
    }

    /// Views of every live conflict.
    #[must_use]
    pub fn list_all(&self) -> Vec<ConflictView> {
        let now = self.clock.now();
        let mut views: Vec<ConflictView> = self
            .conflicts
            .values()
            .map(|c| c.view(now, self.config.grace))
            .collect();
        views.sort_by_key(|v| (v.initiator, v.target));
        views
    }

    /// Number of live conflicts.
    #[must_use]
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }
}
