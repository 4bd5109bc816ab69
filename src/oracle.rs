//! Identity and rank oracle contract.
//!
//! The store never computes faction membership or rank itself; it asks
//! the host simulation through this read-only trait. Implementations are
//! expected to be cheap: every `declare` performs several lookups while
//! the store boundary is held.

use crate::principal::{FactionId, PrincipalId};

/// Read-only identity and rank queries answered by the host.
pub trait IdentityOracle: Send + Sync {
    /// Whether the principal resolves to a known identity at all.
    fn is_known(&self, principal: PrincipalId) -> bool;

    /// Whether the principal currently holds leader-equivalent rank.
    fn is_leader(&self, principal: PrincipalId) -> bool;

    /// The principal's current faction, if any.
    fn faction_of(&self, principal: PrincipalId) -> Option<FactionId>;

    /// All current members of a faction, including its leader(s).
    ///
    /// Used by `declare` to auto-register allies; an empty result simply
    /// means no one is auto-registered.
    fn members_of(&self, faction: &FactionId) -> Vec<PrincipalId>;
}
