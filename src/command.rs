//! Command glue: the host-facing command surface mapped onto the store.
//!
//! Commands are plain data; the host's chat/console layer parses its own
//! syntax, builds a [`Command`], and renders the returned
//! [`CommandOutcome`] however it likes. Two rules live here rather than
//! in the store: only the declaring side may end a conflict (the caller
//! is always passed as the initiator), and only leader-equivalents may
//! propose allies.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::conflict::{BypassStatus, ConflictView};
use crate::error::{ConflictError, WarResult};
use crate::principal::PrincipalId;
use crate::store::WarStore;

/// A conflict command issued by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Declare a conflict against `target`.
    Declare {
        /// The principal being declared upon.
        target: PrincipalId,
    },
    /// End the caller's conflict against `target`.
    End {
        /// The original target of the declaration.
        target: PrincipalId,
    },
    /// List conflicts: all of them, or those involving one principal.
    Status {
        /// Restrict to conflicts involving this principal.
        target: Option<PrincipalId>,
    },
    /// Vote to skip the remaining grace of the conflict with `target`.
    RequestBypass {
        /// The counterpart, in either conflict direction.
        target: PrincipalId,
    },
    /// Propose an ally to every conflict the caller is a party of.
    InviteAlly {
        /// The proposed ally.
        ally: PrincipalId,
    },
    /// Confirm all of the caller's pending ally invites.
    OptIn,
}

/// What a successfully dispatched command did.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    /// A conflict now exists against `target`.
    Declared {
        /// The declared-upon principal.
        target: PrincipalId,
    },
    /// The conflict against `target` was removed.
    Ended {
        /// The former target.
        target: PrincipalId,
    },
    /// The requested status listing.
    Status {
        /// One view per matching conflict.
        conflicts: Vec<ConflictView>,
    },
    /// The result of a bypass vote.
    Bypass {
        /// What the vote did.
        status: BypassStatus,
    },
    /// The ally proposal was recorded.
    Invited {
        /// Number of conflicts the invite was attached to.
        conflicts: usize,
    },
    /// Pending invites were confirmed.
    OptedIn {
        /// Number of conflicts joined.
        conflicts: usize,
    },
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declared { target } => write!(f, "conflict declared against {target}"),
            Self::Ended { target } => write!(f, "conflict with {target} ended"),
            Self::Status { conflicts } => write!(f, "{} conflict(s)", conflicts.len()),
            Self::Bypass { status } => write!(f, "{status}"),
            Self::Invited { conflicts } => {
                write!(f, "ally invited to {conflicts} conflict(s)")
            }
            Self::OptedIn { conflicts } => write!(f, "opted into {conflicts} conflict(s)"),
        }
    }
}

/// Dispatches one command against the store on behalf of `caller`.
///
/// # Errors
/// Propagates [`ConflictError`] from the store; additionally rejects
/// ally proposals from non-leaders, and maps a post-consensus grant
/// failure to [`ConflictError::GrantFailed`] so the caller is told a
/// retry will succeed.
pub fn dispatch(
    store: &mut WarStore,
    caller: PrincipalId,
    command: Command,
) -> WarResult<CommandOutcome> {
    match command {
        Command::Declare { target } => {
            store.declare(caller, target)?;
            Ok(CommandOutcome::Declared { target })
        }
        Command::End { target } => {
            // The caller is always the initiator here: ending someone
            // else's declaration fails with NoSuchConflict.
            store.end(caller, target)?;
            Ok(CommandOutcome::Ended { target })
        }
        Command::Status { target } => {
            let conflicts = match target {
                Some(principal) => store.list_conflicts_for(principal),
                None => store.list_all(),
            };
            Ok(CommandOutcome::Status { conflicts })
        }
        Command::RequestBypass { target } => {
            let status = store.request_bypass(caller, target)?;
            if status == BypassStatus::BothAgreedGrantFailed {
                return Err(ConflictError::GrantFailed.into());
            }
            Ok(CommandOutcome::Bypass { status })
        }
        Command::InviteAlly { ally } => {
            if !store.is_leader_equivalent(caller) {
                return Err(ConflictError::NotLeader { principal: caller }.into());
            }
            let conflicts = store.invite_ally(caller, ally);
            Ok(CommandOutcome::Invited { conflicts })
        }
        Command::OptIn => {
            let conflicts = store.opt_in(caller);
            Ok(CommandOutcome::OptedIn { conflicts })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::WarError;
    use crate::gateway::PrivilegeGateway;
    use crate::oracle::IdentityOracle;
    use crate::persist::MemoryArchive;
    use crate::principal::FactionId;
    use crate::store::WarConfig;

    struct LeaderSet {
        leaders: HashSet<PrincipalId>,
        known: HashSet<PrincipalId>,
    }

    impl IdentityOracle for LeaderSet {
        fn is_known(&self, principal: PrincipalId) -> bool {
            self.known.contains(&principal)
        }

        fn is_leader(&self, principal: PrincipalId) -> bool {
            self.leaders.contains(&principal)
        }

        fn faction_of(&self, _principal: PrincipalId) -> Option<FactionId> {
            None
        }

        fn members_of(&self, _faction: &FactionId) -> Vec<PrincipalId> {
            Vec::new()
        }
    }

    struct OfflineGateway;

    impl PrivilegeGateway for OfflineGateway {
        fn grant_bypass(&self, _principal: PrincipalId) -> bool {
            false
        }

        fn revoke_bypass(&self, _principal: PrincipalId) -> bool {
            false
        }
    }

    struct OnlineGateway;

    impl PrivilegeGateway for OnlineGateway {
        fn grant_bypass(&self, _principal: PrincipalId) -> bool {
            true
        }

        fn revoke_bypass(&self, _principal: PrincipalId) -> bool {
            true
        }
    }

    fn store_with(
        leaders: &[PrincipalId],
        others: &[PrincipalId],
        gateway: Arc<dyn PrivilegeGateway>,
    ) -> WarStore {
        let leaders: HashSet<_> = leaders.iter().copied().collect();
        let mut known = leaders.clone();
        known.extend(others.iter().copied());
        WarStore::open(
            WarConfig::default(),
            Arc::new(ManualClock::at_epoch()),
            Arc::new(LeaderSet { leaders, known }),
            gateway,
            Arc::new(MemoryArchive::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_declare_end_round() {
        let a = PrincipalId::new();
        let b = PrincipalId::new();
        let mut store = store_with(&[a, b], &[], Arc::new(OnlineGateway));

        let out = dispatch(&mut store, a, Command::Declare { target: b }).unwrap();
        assert!(matches!(out, CommandOutcome::Declared { target } if target == b));

        // Only the declaring side may end it.
        let err = dispatch(&mut store, b, Command::End { target: a }).unwrap_err();
        assert!(matches!(
            err,
            WarError::Conflict(ConflictError::NoSuchConflict)
        ));

        let out = dispatch(&mut store, a, Command::End { target: b }).unwrap();
        assert!(matches!(out, CommandOutcome::Ended { .. }));
    }

    #[test]
    fn test_status_scoping() {
        let a = PrincipalId::new();
        let b = PrincipalId::new();
        let c = PrincipalId::new();
        let mut store = store_with(&[a, b, c], &[], Arc::new(OnlineGateway));
        dispatch(&mut store, a, Command::Declare { target: b }).unwrap();
        dispatch(&mut store, c, Command::Declare { target: b }).unwrap();

        let CommandOutcome::Status { conflicts } =
            dispatch(&mut store, a, Command::Status { target: None }).unwrap()
        else {
            panic!("expected status outcome");
        };
        assert_eq!(conflicts.len(), 2);

        let CommandOutcome::Status { conflicts } =
            dispatch(&mut store, a, Command::Status { target: Some(a) }).unwrap()
        else {
            panic!("expected status outcome");
        };
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].involves(a));
    }

    #[test]
    fn test_bypass_grant_failure_maps_to_retryable_error() {
        let a = PrincipalId::new();
        let b = PrincipalId::new();
        let mut store = store_with(&[a, b], &[], Arc::new(OfflineGateway));
        dispatch(&mut store, a, Command::Declare { target: b }).unwrap();

        dispatch(&mut store, a, Command::RequestBypass { target: b }).unwrap();
        let err = dispatch(&mut store, b, Command::RequestBypass { target: a }).unwrap_err();
        assert!(matches!(
            err,
            WarError::Conflict(ConflictError::GrantFailed)
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_invite_gate_requires_leader() {
        let a = PrincipalId::new();
        let b = PrincipalId::new();
        let follower = PrincipalId::new();
        let mut store = store_with(&[a, b], &[follower], Arc::new(OnlineGateway));
        dispatch(&mut store, a, Command::Declare { target: b }).unwrap();

        let err = dispatch(
            &mut store,
            follower,
            Command::InviteAlly { ally: PrincipalId::new() },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            WarError::Conflict(ConflictError::NotLeader { .. })
        ));

        let out = dispatch(&mut store, a, Command::InviteAlly { ally: follower }).unwrap();
        assert!(matches!(out, CommandOutcome::Invited { conflicts: 1 }));

        let out = dispatch(&mut store, follower, Command::OptIn).unwrap();
        assert!(matches!(out, CommandOutcome::OptedIn { conflicts: 1 }));
    }

    #[test]
    fn test_command_serde_shape() {
        let cmd = Command::Declare {
            target: PrincipalId::new(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"command\":\"declare\""));
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, back);
    }

    #[test]
    fn test_outcome_display() {
        let out = CommandOutcome::Invited { conflicts: 3 };
        assert_eq!(out.to_string(), "ally invited to 3 conflict(s)");
        let out = CommandOutcome::Bypass {
            status: BypassStatus::Recorded,
        };
        assert!(out.to_string().contains("recorded"));
    }

    #[test]
    fn test_opt_in_with_nothing_pending() {
        let a = PrincipalId::new();
        let mut store = store_with(&[a], &[], Arc::new(OnlineGateway));
        let out = dispatch(&mut store, a, Command::OptIn).unwrap();
        assert!(matches!(out, CommandOutcome::OptedIn { conflicts: 0 }));
    }

    // Grace math sanity for the full command path.
    #[test]
    fn test_grace_remaining_in_status() {
        let a = PrincipalId::new();
        let b = PrincipalId::new();
        let mut store = store_with(&[a, b], &[], Arc::new(OnlineGateway));
        dispatch(&mut store, a, Command::Declare { target: b }).unwrap();

        let CommandOutcome::Status { conflicts } =
            dispatch(&mut store, a, Command::Status { target: None }).unwrap()
        else {
            panic!("expected status outcome");
        };
        assert_eq!(
            conflicts[0].grace_remaining_ms,
            Duration::hours(1).num_milliseconds()
        );
    }
}
