//! Outbound service contracts: privilege gateway and permission sync.
//!
//! Both traits wrap third-party services that may be unavailable at any
//! moment. Every method is best-effort and idempotent: `false` means the
//! call did not take effect (principal offline, service down) and may be
//! retried later; implementations must not panic.

use crate::principal::PrincipalId;
use crate::rank::Rank;

/// Toggles conflict privileges against the external protection service.
pub trait PrivilegeGateway: Send + Sync {
    /// Grants claim-bypass privileges to a principal.
    ///
    /// Returns `false` when the principal is unreachable or the service
    /// is unavailable. Granting an already-granted principal is a no-op
    /// success.
    fn grant_bypass(&self, principal: PrincipalId) -> bool;

    /// Revokes claim-bypass privileges from a principal.
    ///
    /// Same failure contract as [`PrivilegeGateway::grant_bypass`].
    fn revoke_bypass(&self, principal: PrincipalId) -> bool;
}

/// Pushes rank-derived settings to the permission service.
///
/// Called by the reconcile worker when a principal's derived rank
/// changes. Side effects are idempotent and order-independent.
pub trait PermissionSync: Send + Sync {
    /// Moves the principal into the permission group for `rank`.
    fn set_rank_group(&self, principal: PrincipalId, rank: Rank) -> bool;

    /// Updates the principal's claim allowance.
    fn set_claim_allowance(&self, principal: PrincipalId, allowance: u32) -> bool;
}

/// Achievement-point feed for the reconcile worker.
pub trait PointsSource: Send + Sync {
    /// Principals the worker should scan this pass.
    fn principals(&self) -> Vec<PrincipalId>;

    /// Current point total for a principal.
    fn points_of(&self, principal: PrincipalId) -> u32;
}
