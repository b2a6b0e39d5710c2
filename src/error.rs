//! The conditions raised by the team and quota logic.
//!
//! Every failure of a core operation is one of these. Nothing in here attempts recovery; the
//! caller decides whether to retry.

use crate::schema::{Id, Resource};
use diesel::r2d2::PoolError;
use failure::Fail;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// A `Result` whose error is an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// An error from a team or quota operation.
#[derive(Debug, Fail)]
pub enum Error {
    /// The named entity does not exist.
    #[fail(display = "No {} with ID {}", _0, _1)]
    NotFound(Entity, String),

    /// The request conflicts with the current state.
    #[fail(display = "{}", _0)]
    Conflict(Conflict),

    /// The request was malformed.
    #[fail(display = "Invalid request: {}", _0)]
    Validation(String),

    /// The caller may not perform the operation.
    #[fail(display = "Forbidden: {}", _0)]
    Forbidden(String),

    /// A database query failed.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] diesel::result::Error),

    /// No database connection could be acquired.
    #[fail(display = "Couldn't get a database connection: {}", _0)]
    Pool(#[cause] PoolError),
}

impl Error {
    /// Builds a `NotFound` error.
    pub fn not_found(entity: Entity, id: impl Display) -> Error {
        Error::NotFound(entity, id.to_string())
    }

    /// Returns the conflict, if this is one.
    pub fn conflict(&self) -> Option<&Conflict> {
        match *self {
            Error::Conflict(ref conflict) => Some(conflict),
            _ => None,
        }
    }

    /// Returns whether this is a `NotFound` for the given kind of entity.
    pub fn is_not_found(&self, entity: Entity) -> bool {
        match *self {
            Error::NotFound(e, _) => e == entity,
            _ => false,
        }
    }
}

impl From<Conflict> for Error {
    fn from(conflict: Conflict) -> Error {
        Error::Conflict(conflict)
    }
}

impl From<diesel::result::Error> for Error {
    fn from(err: diesel::result::Error) -> Error {
        Error::Database(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Error {
        Error::Pool(err)
    }
}

/// The kinds of entity an operation can fail to find.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Entity {
    /// A course.
    Course,

    /// A student.
    Student,

    /// A team.
    Team,

    /// A confirmation token.
    Token,

    /// A team's resource quota.
    Quota,

    /// A virtual machine.
    VirtualMachine,
}

impl Display for Entity {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        let name = match *self {
            Entity::Course => "course",
            Entity::Student => "student",
            Entity::Team => "team",
            Entity::Token => "confirmation token",
            Entity::Quota => "resource quota for team",
            Entity::VirtualMachine => "virtual machine",
        };
        fmt.write_str(name)
    }
}

/// A request that is well-formed, but can't be honored in the current state.
#[derive(Clone, Debug, Eq, Fail, PartialEq)]
pub enum Conflict {
    /// The course isn't accepting team proposals.
    #[fail(display = "Course {} is not accepting teams", _0)]
    CourseDisabled(Id),

    /// The proposed team is too small or too large for the course.
    #[fail(
        display = "A team needs between {} and {} members, not {}",
        min, max, requested
    )]
    TeamSize {
        /// The course's minimum team size.
        min: i32,

        /// The course's maximum team size.
        max: i32,

        /// The number of members proposed.
        requested: usize,
    },

    /// A student was listed twice in one proposal.
    #[fail(display = "Student {} is listed more than once", _0)]
    DuplicateMember(Id),

    /// A student isn't enrolled in the course.
    #[fail(display = "Student {} is not enrolled in course {}", student, course)]
    NotEnrolled {
        /// The student.
        student: Id,

        /// The course.
        course: Id,
    },

    /// A student already has an active team in the course.
    #[fail(display = "Student {} already has a team in course {}", student, course)]
    AlreadyTeamed {
        /// The student.
        student: Id,

        /// The course.
        course: Id,
    },

    /// Another team in the course already has the name.
    #[fail(display = "There's already a team named {:?}", _0)]
    TeamNameTaken(String),

    /// The confirmation token expired; its team has been evicted.
    #[fail(display = "Confirmation token {} has expired", _0)]
    TokenExpired(Id),

    /// The team isn't active, so it can't own machines.
    #[fail(display = "Team {} has not been confirmed", _0)]
    TeamNotActive(Id),

    /// The student isn't a member of the team.
    #[fail(display = "Student {} is not a member of team {}", student, team)]
    NotTeamMember {
        /// The student.
        student: Id,

        /// The team.
        team: Id,
    },

    /// The team already has a quota.
    #[fail(display = "Team {} already has a resource quota", _0)]
    QuotaAlreadySet(Id),

    /// The team already holds as many machines as it's allowed.
    #[fail(display = "Team {} already has all {} of its machine slots in use", team, slots)]
    SlotsExceeded {
        /// The team.
        team: Id,

        /// The team's slot count.
        slots: i32,
    },

    /// The team already has as many machines running as it's allowed.
    #[fail(display = "Team {} already has {} machines running", team, max_active)]
    ActiveLimitExceeded {
        /// The team.
        team: Id,

        /// The team's limit on running machines.
        max_active: i32,
    },

    /// The team doesn't have enough of a resource left.
    #[fail(
        display = "Not enough {} available: requested {}, {} left",
        resource, requested, available
    )]
    NotAvailable {
        /// The resource.
        resource: Resource,

        /// The amount requested.
        requested: i32,

        /// The amount the team has left.
        available: i64,
    },

    /// A single machine may not have that much (or that little) of a resource.
    #[fail(
        display = "A machine's {} must be between {} and {}, not {}",
        resource, min, max, requested
    )]
    OutOfBounds {
        /// The resource.
        resource: Resource,

        /// The amount requested.
        requested: i32,

        /// The per-machine minimum.
        min: i32,

        /// The per-machine maximum.
        max: i32,
    },
}
