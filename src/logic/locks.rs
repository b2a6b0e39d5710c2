//! Per-team exclusive sections.

use crate::schema::Id;
use antidote::{Condvar, Mutex};
use std::{collections::HashSet, sync::Arc};

/// The set of teams some thread is currently working on. Cloning gives another handle to the
/// same set; the coordinator and the quota engine share one so that a team's membership and
/// machines are never changed by two threads at once.
#[allow(missing_debug_implementations)]
#[derive(Clone)]
pub struct TeamLocks {
    inner: Arc<LocksInner>,
}

struct LocksInner {
    held: Mutex<HashSet<Id>>,
    released: Condvar,
}

impl TeamLocks {
    /// Creates an empty set of locks.
    pub fn new() -> TeamLocks {
        TeamLocks {
            inner: Arc::new(LocksInner {
                held: Mutex::new(HashSet::new()),
                released: Condvar::new(),
            }),
        }
    }

    /// Blocks until no other thread holds the team, then holds it until the guard drops.
    pub fn lock(&self, team: Id) -> TeamGuard {
        let mut held = self.inner.held.lock();
        while held.contains(&team) {
            held = self.inner.released.wait(held);
        }
        let _ = held.insert(team);
        TeamGuard {
            locks: self.clone(),
            team,
        }
    }

    /// Returns whether some thread currently holds the team.
    pub fn is_held(&self, team: Id) -> bool {
        self.inner.held.lock().contains(&team)
    }
}

/// Exclusive access to one team. Dropping it lets the next waiter in.
#[allow(missing_debug_implementations)]
pub struct TeamGuard {
    locks: TeamLocks,
    team: Id,
}

impl TeamGuard {
    /// The team this guard holds.
    pub fn team(&self) -> Id {
        self.team
    }
}

impl Drop for TeamGuard {
    fn drop(&mut self) {
        let _ = self.locks.inner.held.lock().remove(&self.team);
        self.locks.inner.released.notify_all();
    }
}
