//! Business logic.
//!
//! > **Logic** is the "business (or domain) logic" of the application. The front-end will pull
//! > the necessary information out of the request, and call into this module as quickly as
//! > possible to do all the actual work.
//!
//! The two halves, [`team::TeamCoordinator`] and [`vm::QuotaEngine`], share one set of
//! [`locks::TeamLocks`]; build them together with [`Services::new`].

pub mod access;
pub mod clock;
pub mod locks;
pub mod notify;
pub mod team;
pub mod vm;

use crate::{
    dal::DB,
    logic::{
        clock::Clock,
        locks::TeamLocks,
        notify::Notifier,
        team::{Policy, TeamCoordinator},
        vm::QuotaEngine,
    },
};
use std::sync::Arc;

/// The coordinator and the quota engine, sharing a database and per-team locks.
#[allow(missing_debug_implementations)]
pub struct Services {
    /// Team formation.
    pub teams: TeamCoordinator,

    /// Virtual machine quotas.
    pub vms: QuotaEngine,
}

impl Services {
    /// Wires up both halves of the logic.
    pub fn new(
        db: DB,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        policy: Policy,
    ) -> Services {
        let locks = TeamLocks::new();
        Services {
            teams: TeamCoordinator::new(db.clone(), locks.clone(), clock.clone(), notifier, policy),
            vms: QuotaEngine::new(db, locks, clock),
        }
    }
}
