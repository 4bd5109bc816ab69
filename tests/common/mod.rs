//! Shared fakes for the integration suites.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use warpact::{FactionId, IdentityOracle, PrincipalId, PrivilegeGateway};

/// Installs a test-writer subscriber so `RUST_LOG=warpact=debug cargo
/// test` shows store decisions. Safe to call from every test.
pub fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Oracle fake with explicit leader / member rosters.
#[derive(Default)]
pub struct ScriptedOracle {
    known: HashSet<PrincipalId>,
    leaders: HashSet<PrincipalId>,
    factions: HashMap<PrincipalId, FactionId>,
}

impl ScriptedOracle {
    pub fn leader(&mut self, p: PrincipalId, faction: &str) {
        self.known.insert(p);
        self.leaders.insert(p);
        self.factions.insert(p, FactionId::new(faction));
    }

    pub fn member(&mut self, p: PrincipalId, faction: &str) {
        self.known.insert(p);
        self.factions.insert(p, FactionId::new(faction));
    }
}

impl IdentityOracle for ScriptedOracle {
    fn is_known(&self, principal: PrincipalId) -> bool {
        self.known.contains(&principal)
    }

    fn is_leader(&self, principal: PrincipalId) -> bool {
        self.leaders.contains(&principal)
    }

    fn faction_of(&self, principal: PrincipalId) -> Option<FactionId> {
        self.factions.get(&principal).cloned()
    }

    fn members_of(&self, faction: &FactionId) -> Vec<PrincipalId> {
        let mut members: Vec<PrincipalId> = self
            .factions
            .iter()
            .filter(|(_, f)| *f == faction)
            .map(|(p, _)| *p)
            .collect();
        members.sort();
        members
    }
}

/// Gateway fake: everyone is online unless marked offline or the whole
/// service is down. Records every successful grant/revoke.
#[derive(Default)]
pub struct FlappableGateway {
    offline: Mutex<HashSet<PrincipalId>>,
    service_down: AtomicBool,
    grants: Mutex<Vec<PrincipalId>>,
    revokes: Mutex<Vec<PrincipalId>>,
}

impl FlappableGateway {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_service_down(&self, down: bool) {
        self.service_down.store(down, Ordering::SeqCst);
    }

    pub fn set_offline(&self, p: PrincipalId, offline: bool) {
        let mut set = self.offline.lock().unwrap();
        if offline {
            set.insert(p);
        } else {
            set.remove(&p);
        }
    }

    fn reachable(&self, p: PrincipalId) -> bool {
        !self.service_down.load(Ordering::SeqCst) && !self.offline.lock().unwrap().contains(&p)
    }

    pub fn grants_to(&self, p: PrincipalId) -> usize {
        self.grants.lock().unwrap().iter().filter(|g| **g == p).count()
    }

    pub fn revokes_to(&self, p: PrincipalId) -> usize {
        self.revokes.lock().unwrap().iter().filter(|g| **g == p).count()
    }
}

impl PrivilegeGateway for FlappableGateway {
    fn grant_bypass(&self, principal: PrincipalId) -> bool {
        if !self.reachable(principal) {
            return false;
        }
        self.grants.lock().unwrap().push(principal);
        true
    }

    fn revoke_bypass(&self, principal: PrincipalId) -> bool {
        if !self.reachable(principal) {
            return false;
        }
        self.revokes.lock().unwrap().push(principal);
        true
    }
}
