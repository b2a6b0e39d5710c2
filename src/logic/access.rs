//! Who may do what.
//!
//! Every operation in [`logic`](crate::logic) takes a [`Caller`] and checks one of these before
//! it reads anything it intends to change. Authentication happens elsewhere; by the time a
//! `Caller` exists, it's trusted.

use crate::{
    error::{Error, Result},
    schema::{ConfirmationToken, Id},
};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// The principal an operation is performed on behalf of.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Caller {
    /// A course administrator, who may do anything.
    Admin,

    /// A student, identified by their ID.
    Student(Id),
}

impl Caller {
    fn is(self, student: Id) -> bool {
        match self {
            Caller::Admin => false,
            Caller::Student(id) => id == student,
        }
    }

    fn is_admin(self) -> bool {
        self == Caller::Admin
    }
}

impl Display for Caller {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        match *self {
            Caller::Admin => fmt.write_str("admin"),
            Caller::Student(id) => write!(fmt, "student {}", id),
        }
    }
}

/// A student may only propose a team they're on.
pub fn can_propose(caller: Caller, members: &[Id]) -> bool {
    caller.is_admin() || members.iter().any(|&member| caller.is(member))
}

/// Only the invited student answers their own invitation.
pub fn can_answer(caller: Caller, token: &ConfirmationToken) -> bool {
    caller.is_admin() || caller.is(token.student)
}

/// Quotas are set by administrators.
pub fn can_manage_quota(caller: Caller) -> bool {
    caller.is_admin()
}

/// A student may create machines for themselves.
pub fn can_create_vm(caller: Caller, owner: Id) -> bool {
    caller.is_admin() || caller.is(owner)
}

/// A machine is started, stopped, shared, and deleted by its owners.
pub fn can_operate_vm(caller: Caller, owners: &[Id]) -> bool {
    caller.is_admin() || owners.iter().any(|&owner| caller.is(owner))
}

/// Turns a denied check into an error.
pub fn require(allowed: bool, caller: Caller, action: &str) -> Result<()> {
    if allowed {
        Ok(())
    } else {
        Err(Error::Forbidden(format!("{} may not {}", caller, action)))
    }
}
