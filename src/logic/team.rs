//! Team formation.
//!
//! A proposed team exists only provisionally until every member has confirmed it. Each member is
//! sent a confirmation token; the last confirmation makes the team active, and a single rejection
//! (or a token running out) deletes the team and every token it still has outstanding.
//!
//! ```text
//!           all invited confirm before expiry
//! UNCONFIRMED ───────────────────────────────► ACTIVE
//!     │  any reject, or any token expires unresolved
//!     ▼
//!  (deleted)
//! ```

use crate::{
    dal::DB,
    error::{Conflict, Error, Result},
    logic::{
        access::{can_answer, can_propose, require, Caller},
        clock::Clock,
        locks::TeamLocks,
        notify::{Invitation, Notifier},
    },
    schema::{ConfirmationToken, Course, Id, Student, Team},
    util::log_fail,
};
use antidote::Mutex;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::{collections::HashSet, sync::Arc};

/// The knobs of the formation workflow.
#[derive(Clone, Debug)]
pub struct Policy {
    /// How long members have to answer an invitation.
    pub token_lifetime: Duration,

    /// The URL confirmation and rejection links are relative to.
    pub public_url: String,
}

impl Default for Policy {
    fn default() -> Policy {
        Policy {
            token_lifetime: Duration::hours(1),
            public_url: "http://localhost:8080".to_owned(),
        }
    }
}

impl Policy {
    /// The link a member follows to confirm.
    pub fn confirm_link(&self, token: Id) -> String {
        format!("{}/team/confirm/{}", self.public_url.trim_end_matches('/'), token)
    }

    /// The link a member follows to reject.
    pub fn reject_link(&self, token: Id) -> String {
        format!("{}/team/reject/{}", self.public_url.trim_end_matches('/'), token)
    }
}

/// A newly proposed team.
#[derive(Clone, Debug)]
pub struct Proposal {
    /// The team, still unconfirmed.
    pub team: Team,

    /// Its members.
    pub members: Vec<Student>,

    /// One token per member.
    pub tokens: Vec<ConfirmationToken>,

    /// The members whose invitation couldn't be delivered. The proposal stands regardless.
    pub undelivered: Vec<Id>,
}

/// Why a team was evicted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EvictionCause {
    /// A member rejected it.
    Rejected,

    /// A token ran out before it was answered.
    Expired,
}

/// The result of evicting a team.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Eviction {
    /// The team that was deleted.
    pub team: Id,

    /// How many tokens were still outstanding.
    pub tokens_removed: usize,

    /// Why.
    pub cause: EvictionCause,
}

/// What one pass of [`TeamCoordinator::sweep_expired`] did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SweepReport {
    /// Teams evicted for having an expired token.
    pub evicted: Vec<Id>,

    /// Teams that couldn't be evicted. They'll be picked up again by the next sweep.
    pub failed: Vec<Id>,
}

/// How a confirmation ended, decided inside the transaction and turned into a result after it
/// commits, so that evictions stick even when the caller sees an error.
enum Confirmation {
    Pending,
    Activated,
    Expired,
    AlreadyTeamed { student: Id, course: Id },
}

/// Runs the team formation workflow.
#[allow(missing_debug_implementations)]
pub struct TeamCoordinator {
    db: DB,
    locks: TeamLocks,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    policy: Policy,
    sweeping: Mutex<()>,
}

impl TeamCoordinator {
    /// Creates a coordinator. `locks` should be shared with the quota engine.
    pub fn new(
        db: DB,
        locks: TeamLocks,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        policy: Policy,
    ) -> TeamCoordinator {
        TeamCoordinator {
            db,
            locks,
            clock,
            notifier,
            policy,
            sweeping: Mutex::new(()),
        }
    }

    /// The policy in effect.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Proposes a team, issuing every member a token and sending them an invitation.
    pub fn propose_team(
        &self,
        caller: Caller,
        course_id: Id,
        name: &str,
        member_ids: &[Id],
    ) -> Result<Proposal> {
        require(can_propose(caller, member_ids), caller, "propose a team they're not on")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("a team needs a name".to_owned()));
        }
        if member_ids.is_empty() {
            return Err(Error::Validation("a team needs members".to_owned()));
        }

        let now = self.clock.now();
        let expires = now + self.policy.token_lifetime;
        let (course, team, members, tokens) = self.db.atomically(|tx| {
            let course = tx.course(course_id)?;
            if !course.enabled {
                return Err(Conflict::CourseDisabled(course.id).into());
            }
            check_team_size(&course, member_ids.len())?;
            let mut seen = HashSet::new();
            for &id in member_ids {
                if !seen.insert(id) {
                    return Err(Conflict::DuplicateMember(id).into());
                }
            }
            for &id in member_ids {
                let _ = tx.student(id)?;
                if !tx.is_enrolled(course.id, id)? {
                    return Err(Conflict::NotEnrolled {
                        student: id,
                        course: course.id,
                    }
                    .into());
                }
                if tx.active_team_of(id, course.id)?.is_some() {
                    return Err(Conflict::AlreadyTeamed {
                        student: id,
                        course: course.id,
                    }
                    .into());
                }
            }
            if tx.team_by_name(course.id, name)?.is_some() {
                return Err(Conflict::TeamNameTaken(name.to_owned()).into());
            }

            let team = tx.insert_team(course.id, name, member_ids, now.naive_utc())?;
            let tokens = member_ids
                .iter()
                .map(|&id| tx.insert_token(team.id, id, expires.naive_utc()))
                .collect::<Result<Vec<_>>>()?;
            let members = tx.members(team.id)?;
            Ok((course, team, members, tokens))
        })?;
        info!(
            "Team {} ({:?}) proposed in {:?} with {} members",
            team.id,
            team.name,
            course.name,
            members.len()
        );

        let undelivered = self.invite(&course, &team, &members, &tokens, now, expires);
        Ok(Proposal {
            team,
            members,
            tokens,
            undelivered,
        })
    }

    /// Hands each token to the notifier, returning whoever it failed for.
    fn invite(
        &self,
        course: &Course,
        team: &Team,
        members: &[Student],
        tokens: &[ConfirmationToken],
        sent: DateTime<Utc>,
        expires: DateTime<Utc>,
    ) -> Vec<Id> {
        let invitation = Invitation {
            team: team.clone(),
            course: course.clone(),
            members: members.to_vec(),
            sent,
            expires,
        };
        let mut undelivered = Vec::new();
        for token in tokens {
            let recipient = match members.iter().find(|m| m.id == token.student) {
                Some(recipient) => recipient,
                None => continue,
            };
            let r = self.notifier.deliver(
                recipient,
                &self.policy.confirm_link(token.id),
                &self.policy.reject_link(token.id),
                &invitation,
            );
            if let Err(err) = r {
                warn!(
                    "Couldn't deliver the invitation to team {} to {} <{}>: {}",
                    team.id, recipient.name, recipient.email, err
                );
                undelivered.push(recipient.id);
            }
        }
        undelivered
    }

    /// Confirms a token. Returns true if this was the last outstanding confirmation, making the
    /// team active.
    ///
    /// A token that has expired can't be confirmed; trying evicts its team and fails with
    /// [`Conflict::TokenExpired`].
    pub fn confirm(&self, caller: Caller, token_id: Id) -> Result<bool> {
        let token = self.db.read(|tx| tx.token(token_id))?;
        require(can_answer(caller, &token), caller, "answer another student's invitation")?;

        let _guard = self.locks.lock(token.team);
        let now = self.clock.now().naive_utc();
        let outcome = self.db.atomically(|tx| {
            let token = tx.token(token_id)?;
            if token.is_expired(now) {
                let _ = tx.evict_team(token.team)?;
                return Ok(Confirmation::Expired);
            }
            let _ = tx.delete_token(token.id)?;
            if tx.count_tokens(token.team)? > 0 {
                return Ok(Confirmation::Pending);
            }

            let team = tx.team(token.team)?;
            for member in tx.members(team.id)? {
                if tx.active_team_of(member.id, team.course)?.is_some() {
                    let _ = tx.evict_team(team.id)?;
                    return Ok(Confirmation::AlreadyTeamed {
                        student: member.id,
                        course: team.course,
                    });
                }
            }
            tx.activate_team(team.id)?;
            Ok(Confirmation::Activated)
        })?;

        match outcome {
            Confirmation::Pending => {
                debug!("Token {} confirmed; team {} still waiting", token.id, token.team);
                Ok(false)
            }
            Confirmation::Activated => {
                info!("Team {} is now active", token.team);
                Ok(true)
            }
            Confirmation::Expired => {
                info!("Team {} evicted: token {} expired", token.team, token.id);
                Err(Conflict::TokenExpired(token.id).into())
            }
            Confirmation::AlreadyTeamed { student, course } => {
                info!(
                    "Team {} evicted: student {} joined another team first",
                    token.team, student
                );
                Err(Conflict::AlreadyTeamed { student, course }.into())
            }
        }
    }

    /// Rejects a token, evicting its team. An expired token evicts the team just the same.
    pub fn reject(&self, caller: Caller, token_id: Id) -> Result<Eviction> {
        let token = self.db.read(|tx| tx.token(token_id))?;
        require(can_answer(caller, &token), caller, "answer another student's invitation")?;

        let _guard = self.locks.lock(token.team);
        let now = self.clock.now().naive_utc();
        let eviction = self.db.atomically(|tx| {
            let token = tx.token(token_id)?;
            let cause = if token.is_expired(now) {
                EvictionCause::Expired
            } else {
                EvictionCause::Rejected
            };
            let tokens_removed = tx.evict_team(token.team)?;
            Ok(Eviction {
                team: token.team,
                tokens_removed,
                cause,
            })
        })?;
        info!(
            "Team {} evicted ({:?}), {} tokens removed",
            eviction.team, eviction.cause, eviction.tokens_removed
        );
        Ok(eviction)
    }

    /// Evicts every team holding an expired token. Returns `None` without doing anything if
    /// another sweep is already running.
    ///
    /// Each team is evicted in its own transaction, so one failing doesn't stop the rest. Failing
    /// to find the expired teams in the first place is an error.
    pub fn sweep_expired(&self) -> Result<Option<SweepReport>> {
        let _sweeping = match self.sweeping.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("A sweep is already running");
                return Ok(None);
            }
        };

        let now = self.clock.now().naive_utc();
        let mut report = SweepReport::default();
        let teams = self.db.read(|tx| tx.teams_with_expired_tokens(now))?;

        for team in teams {
            let _guard = self.locks.lock(team);
            let r = self.db.atomically(|tx| {
                if tx.has_expired_tokens(team, now)? {
                    tx.evict_team(team).map(Some)
                } else {
                    Ok(None)
                }
            });
            match r {
                Ok(Some(tokens)) => {
                    info!("Team {} evicted by sweep, {} tokens removed", team, tokens);
                    report.evicted.push(team);
                }
                Ok(None) => {}
                Err(err) => {
                    log_fail(err);
                    report.failed.push(team);
                }
            }
        }
        Ok(Some(report))
    }

    /// Gets a team.
    pub fn team(&self, team: Id) -> Result<Team> {
        self.db.read(|tx| tx.team(team))
    }

    /// Gets a team's members.
    pub fn members(&self, team: Id) -> Result<Vec<Student>> {
        self.db.read(|tx| {
            let _ = tx.team(team)?;
            tx.members(team)
        })
    }

    /// Gets the tokens of a team that haven't been answered yet.
    pub fn outstanding_tokens(&self, team: Id) -> Result<Vec<ConfirmationToken>> {
        self.db.read(|tx| tx.tokens(team))
    }

    /// Gets the teams a student is on, in one course or all of them.
    pub fn teams_of(&self, student: Id, course: Option<Id>) -> Result<Vec<Team>> {
        self.db.read(|tx| {
            let _ = tx.student(student)?;
            tx.teams_of(student, course)
        })
    }

    /// Gets a course.
    pub fn course(&self, course: Id) -> Result<Course> {
        self.db.read(|tx| tx.course(course))
    }
}

fn check_team_size(course: &Course, requested: usize) -> Result<()> {
    let fits = requested >= course.min_team_size as usize
        && requested <= course.max_team_size as usize;
    if fits {
        Ok(())
    } else {
        Err(Conflict::TeamSize {
            min: course.min_team_size,
            max: course.max_team_size,
            requested,
        }
        .into())
    }
}
