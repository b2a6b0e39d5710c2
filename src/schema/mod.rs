//! Types used throughout.
//!
//! > Schema defines the plain old data types that views operate on. Notably, the schema module has
//! > no knowledge of the database, nor any dependencies on any of the rest of the system.
//!
//! (The SQL conversions for `Id` and the status enums live in `dal`; only the derives that name
//! their SQL type are here.)

use crate::error::Error;
use chrono::NaiveDateTime;
use serde_derive::Serialize;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};
use uuid::Uuid;

/// The identifier of a course, student, team, token, or virtual machine.
#[derive(
    AsExpression,
    Clone,
    Copy,
    Debug,
    Eq,
    FromSqlRow,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(transparent)]
#[sql_type = "diesel::sql_types::Text"]
pub struct Id(pub Uuid);

impl Id {
    /// Generates a new random ID. These are v4 UUIDs, so they're fine to hand out as bearer
    /// tokens.
    pub fn generate() -> Id {
        Id(Uuid::new_v4())
    }
}

impl Display for Id {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        Display::fmt(&self.0, fmt)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id, Error> {
        s.trim()
            .parse()
            .map(Id)
            .map_err(|_| Error::Validation(format!("{:?} is not a valid identifier", s)))
    }
}

/// A course.
#[derive(Clone, Debug, Queryable, Serialize)]
pub struct Course {
    /// The course's database ID.
    pub id: Id,

    /// The course's name.
    pub name: String,

    /// The fewest members a team may have.
    pub min_team_size: i32,

    /// The most members a team may have.
    pub max_team_size: i32,

    /// Whether the course currently accepts team proposals.
    pub enabled: bool,
}

/// A student.
#[derive(Clone, Debug, Queryable, Serialize)]
pub struct Student {
    /// The student's database ID.
    pub id: Id,

    /// The student's name.
    pub name: String,

    /// The student's email address.
    pub email: String,
}

/// Where a team is in the formation workflow. Evicted teams are deleted, so there's no terminal
/// "rejected" status.
#[derive(AsExpression, Clone, Copy, Debug, Eq, FromSqlRow, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[sql_type = "diesel::sql_types::Text"]
pub enum TeamStatus {
    /// Proposed, waiting on confirmations.
    Unconfirmed,

    /// Every member confirmed.
    Active,
}

/// A team.
#[derive(Clone, Debug, Queryable, Serialize)]
pub struct Team {
    /// The team's database ID.
    pub id: Id,

    /// The ID of the course the team is in.
    pub course: Id,

    /// The team's name.
    pub name: String,

    /// The team's status.
    pub status: TeamStatus,

    /// When the team was proposed (UTC).
    pub proposed_at: NaiveDateTime,
}

impl Team {
    /// Returns whether every member has confirmed the team.
    pub fn is_active(&self) -> bool {
        self.status == TeamStatus::Active
    }
}

/// An outstanding invitation for one student to confirm or reject a team.
#[derive(Clone, Debug, Queryable, Serialize)]
pub struct ConfirmationToken {
    /// The token itself.
    pub id: Id,

    /// The team the token is for.
    pub team: Id,

    /// The invited student.
    pub student: Id,

    /// When the token stops being accepted (UTC).
    pub expires: NaiveDateTime,
}

impl ConfirmationToken {
    /// Returns whether the token has expired as of `now`.
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.expires <= now
    }
}

/// One of the resources a machine consumes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    /// Virtual CPUs.
    Vcpu,

    /// Disk space.
    Disk,

    /// Memory.
    Ram,
}

impl Resource {
    /// Every resource, in the order they're checked.
    pub const ALL: [Resource; 3] = [Resource::Vcpu, Resource::Disk, Resource::Ram];
}

impl Display for Resource {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.write_str(match *self {
            Resource::Vcpu => "vcpu",
            Resource::Disk => "disk",
            Resource::Ram => "ram",
        })
    }
}

/// The resources a single machine is allocated.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Footprint {
    /// Virtual CPUs.
    pub vcpu: i32,

    /// Disk space.
    pub disk: i32,

    /// Memory.
    pub ram: i32,
}

impl Footprint {
    /// Returns the amount of the given resource.
    pub fn get(&self, resource: Resource) -> i32 {
        match resource {
            Resource::Vcpu => self.vcpu,
            Resource::Disk => self.disk,
            Resource::Ram => self.ram,
        }
    }
}

/// The limits a team's machines must stay within.
///
/// The `min_*`/`max_*` pairs bound each machine individually; the `total_*` fields cap the sum
/// over all of the team's machines, running or not.
#[derive(Clone, Debug, Eq, PartialEq, Queryable, Serialize)]
pub struct ResourceQuota {
    /// The team the quota belongs to.
    pub team: Id,

    /// The fewest vCPUs a machine may have.
    pub min_vcpu: i32,

    /// The most vCPUs a machine may have.
    pub max_vcpu: i32,

    /// The least disk a machine may have.
    pub min_disk: i32,

    /// The most disk a machine may have.
    pub max_disk: i32,

    /// The least memory a machine may have.
    pub min_ram: i32,

    /// The most memory a machine may have.
    pub max_ram: i32,

    /// The most vCPUs all the team's machines may have together.
    pub total_vcpu: i32,

    /// The most disk all the team's machines may have together.
    pub total_disk: i32,

    /// The most memory all the team's machines may have together.
    pub total_ram: i32,

    /// The most machines the team may have, running or not.
    pub total_slots: i32,

    /// The most machines the team may have running at once.
    pub max_active: i32,
}

impl ResourceQuota {
    /// Returns the per-machine `(min, max)` for a resource.
    pub fn bounds(&self, resource: Resource) -> (i32, i32) {
        match resource {
            Resource::Vcpu => (self.min_vcpu, self.max_vcpu),
            Resource::Disk => (self.min_disk, self.max_disk),
            Resource::Ram => (self.min_ram, self.max_ram),
        }
    }

    /// Returns the team-wide cap for a resource.
    pub fn cap(&self, resource: Resource) -> i32 {
        match resource {
            Resource::Vcpu => self.total_vcpu,
            Resource::Disk => self.total_disk,
            Resource::Ram => self.total_ram,
        }
    }

    /// Checks that the quota is internally consistent.
    pub fn validate(&self) -> Result<(), Error> {
        for &resource in &Resource::ALL {
            let (min, max) = self.bounds(resource);
            if min < 0 || min > max {
                return Err(Error::Validation(format!(
                    "the {} bounds {}..={} are empty",
                    resource, min, max
                )));
            }
            if self.cap(resource) < 0 {
                return Err(Error::Validation(format!("the {} cap is negative", resource)));
            }
        }
        if self.total_slots < 0 || self.max_active < 0 {
            return Err(Error::Validation("machine counts must not be negative".to_owned()));
        }
        if self.max_active > self.total_slots {
            return Err(Error::Validation(format!(
                "{} running machines won't fit in {} slots",
                self.max_active, self.total_slots
            )));
        }
        Ok(())
    }
}

/// Whether a virtual machine is running.
#[derive(AsExpression, Clone, Copy, Debug, Eq, FromSqlRow, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[sql_type = "diesel::sql_types::Text"]
pub enum VmStatus {
    /// Stopped.
    Off,

    /// Running.
    On,
}

/// A virtual machine.
#[derive(Clone, Debug, Queryable, Serialize)]
pub struct VirtualMachine {
    /// The machine's database ID.
    pub id: Id,

    /// The team the machine belongs to.
    pub team: Id,

    /// Virtual CPUs.
    pub vcpu: i32,

    /// Disk space.
    pub disk: i32,

    /// Memory.
    pub ram: i32,

    /// Whether the machine is running.
    pub status: VmStatus,

    /// When the machine was created (UTC).
    pub created_at: NaiveDateTime,
}

impl VirtualMachine {
    /// Returns the machine's allocation.
    pub fn footprint(&self) -> Footprint {
        Footprint {
            vcpu: self.vcpu,
            disk: self.disk,
            ram: self.ram,
        }
    }

    /// Returns whether the machine is running.
    pub fn is_on(&self) -> bool {
        self.status == VmStatus::On
    }
}

/// What a team's machines currently take up.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Usage {
    /// The number of machines.
    pub machines: usize,

    /// The number of running machines.
    pub active: usize,

    /// Total vCPUs allocated.
    pub vcpu: i64,

    /// Total disk allocated.
    pub disk: i64,

    /// Total memory allocated.
    pub ram: i64,
}

impl Usage {
    /// Totals up the given machines.
    pub fn of<'a, I: IntoIterator<Item = &'a VirtualMachine>>(vms: I) -> Usage {
        vms.into_iter().fold(Usage::default(), |mut usage, vm| {
            usage.machines += 1;
            if vm.is_on() {
                usage.active += 1;
            }
            usage.vcpu += i64::from(vm.vcpu);
            usage.disk += i64::from(vm.disk);
            usage.ram += i64::from(vm.ram);
            usage
        })
    }

    /// Returns the amount of a resource allocated.
    pub fn allocated(&self, resource: Resource) -> i64 {
        match resource {
            Resource::Vcpu => self.vcpu,
            Resource::Disk => self.disk,
            Resource::Ram => self.ram,
        }
    }
}
