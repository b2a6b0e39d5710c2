//! Virtual machine admission control.
//!
//! Every change to a team's machines goes through [`QuotaEngine`], which checks it against the
//! team's [`ResourceQuota`] while holding the team's lock and the database's write lock. The
//! checks and the write are therefore one step: two requests can't both squeeze into the last
//! slot.

use crate::{
    dal::DB,
    error::{Conflict, Result},
    logic::{
        access::{can_create_vm, can_manage_quota, can_operate_vm, require, Caller},
        clock::Clock,
        locks::TeamLocks,
    },
    schema::{Footprint, Id, Resource, ResourceQuota, Usage, VirtualMachine, VmStatus},
};
use log::{debug, info};
use std::sync::Arc;

/// Enforces resource quotas on teams' virtual machines.
#[allow(missing_debug_implementations)]
pub struct QuotaEngine {
    db: DB,
    locks: TeamLocks,
    clock: Arc<dyn Clock>,
}

impl QuotaEngine {
    /// Creates an engine. `locks` should be shared with the team coordinator.
    pub fn new(db: DB, locks: TeamLocks, clock: Arc<dyn Clock>) -> QuotaEngine {
        QuotaEngine { db, locks, clock }
    }

    /// Sets a team's quota. A team's quota can only be set once.
    pub fn set_quota(&self, caller: Caller, quota: ResourceQuota) -> Result<ResourceQuota> {
        require(can_manage_quota(caller), caller, "set quotas")?;
        quota.validate()?;

        let _guard = self.locks.lock(quota.team);
        let quota = self.db.atomically(|tx| {
            let _ = tx.team(quota.team)?;
            if tx.find_quota(quota.team)?.is_some() {
                return Err(Conflict::QuotaAlreadySet(quota.team).into());
            }
            tx.insert_quota(&quota)?;
            tx.quota(quota.team)
        })?;
        info!("Quota set for team {}", quota.team);
        Ok(quota)
    }

    /// Creates a stopped machine for a member of an active team, if it fits in the team's quota.
    pub fn create_virtual_machine(
        &self,
        caller: Caller,
        team_id: Id,
        owner_id: Id,
        footprint: Footprint,
    ) -> Result<VirtualMachine> {
        require(can_create_vm(caller, owner_id), caller, "create machines for others")?;

        let _guard = self.locks.lock(team_id);
        let now = self.clock.now().naive_utc();
        let vm = self.db.atomically(|tx| {
            let team = tx.team(team_id)?;
            if !team.is_active() {
                return Err(Conflict::TeamNotActive(team.id).into());
            }
            let _ = tx.student(owner_id)?;
            if !tx.is_member(team.id, owner_id)? {
                return Err(Conflict::NotTeamMember {
                    student: owner_id,
                    team: team.id,
                }
                .into());
            }
            let quota = tx.quota(team.id)?;
            let usage = Usage::of(&tx.virtual_machines(team.id)?);
            if let Err(conflict) = admit(&quota, &usage, footprint) {
                debug!("Refused a machine for team {}: {}", team.id, conflict);
                return Err(conflict.into());
            }
            tx.insert_vm(team.id, owner_id, footprint, now)
        })?;
        info!(
            "Created machine {} for team {} ({} vcpu, {} disk, {} ram)",
            vm.id, vm.team, vm.vcpu, vm.disk, vm.ram
        );
        Ok(vm)
    }

    /// Starts a machine, if the team isn't already running as many as it may. Starting a running
    /// machine does nothing.
    pub fn turn_on(&self, caller: Caller, vm_id: Id) -> Result<VirtualMachine> {
        self.set_status(caller, vm_id, VmStatus::On)
    }

    /// Stops a machine. Stopping a stopped machine does nothing.
    pub fn turn_off(&self, caller: Caller, vm_id: Id) -> Result<VirtualMachine> {
        self.set_status(caller, vm_id, VmStatus::Off)
    }

    fn set_status(&self, caller: Caller, vm_id: Id, status: VmStatus) -> Result<VirtualMachine> {
        let team = self.team_of(vm_id)?;
        let _guard = self.locks.lock(team);
        let (vm, changed) = self.db.atomically(|tx| {
            let vm = tx.virtual_machine(vm_id)?;
            require(can_operate_vm(caller, &tx.owners(vm.id)?), caller, "operate the machine")?;
            if vm.status == status {
                return Ok((vm, false));
            }
            if status == VmStatus::On {
                let quota = tx.quota(vm.team)?;
                let usage = Usage::of(&tx.virtual_machines(vm.team)?);
                if usage.active as i64 >= i64::from(quota.max_active) {
                    return Err(Conflict::ActiveLimitExceeded {
                        team: vm.team,
                        max_active: quota.max_active,
                    }
                    .into());
                }
            }
            tx.set_vm_status(vm.id, status)?;
            Ok((tx.virtual_machine(vm.id)?, true))
        })?;
        if changed {
            info!("Machine {} is now {:?}", vm.id, vm.status);
        }
        Ok(vm)
    }

    /// Gives another member of the team access to a machine. Returns false if they already had
    /// it.
    pub fn add_owner(&self, caller: Caller, student_id: Id, vm_id: Id) -> Result<bool> {
        let team = self.team_of(vm_id)?;
        let _guard = self.locks.lock(team);
        self.db.atomically(|tx| {
            let vm = tx.virtual_machine(vm_id)?;
            require(can_operate_vm(caller, &tx.owners(vm.id)?), caller, "share the machine")?;
            let _ = tx.student(student_id)?;
            if !tx.is_member(vm.team, student_id)? {
                return Err(Conflict::NotTeamMember {
                    student: student_id,
                    team: vm.team,
                }
                .into());
            }
            tx.add_owner(vm.id, student_id)
        })
    }

    /// Takes away a student's access to a machine. Returns false if they didn't have it.
    pub fn remove_owner(&self, caller: Caller, student_id: Id, vm_id: Id) -> Result<bool> {
        let team = self.team_of(vm_id)?;
        let _guard = self.locks.lock(team);
        self.db.atomically(|tx| {
            let vm = tx.virtual_machine(vm_id)?;
            require(can_operate_vm(caller, &tx.owners(vm.id)?), caller, "share the machine")?;
            tx.remove_owner(vm.id, student_id)
        })
    }

    /// Deletes a machine, freeing its slot and resources.
    pub fn delete_virtual_machine(&self, caller: Caller, vm_id: Id) -> Result<()> {
        let team = self.team_of(vm_id)?;
        let _guard = self.locks.lock(team);
        self.db.atomically(|tx| {
            let vm = tx.virtual_machine(vm_id)?;
            require(can_operate_vm(caller, &tx.owners(vm.id)?), caller, "delete the machine")?;
            let _ = tx.delete_vm(vm.id)?;
            Ok(())
        })?;
        info!("Deleted machine {} of team {}", vm_id, team);
        Ok(())
    }

    /// Gets a team's quota.
    pub fn quota(&self, team: Id) -> Result<ResourceQuota> {
        self.db.read(|tx| tx.quota(team))
    }

    /// Gets a machine.
    pub fn virtual_machine(&self, vm: Id) -> Result<VirtualMachine> {
        self.db.read(|tx| tx.virtual_machine(vm))
    }

    /// Gets a team's machines.
    pub fn virtual_machines(&self, team: Id) -> Result<Vec<VirtualMachine>> {
        self.db.read(|tx| {
            let _ = tx.team(team)?;
            tx.virtual_machines(team)
        })
    }

    /// Gets the owners of a machine.
    pub fn owners(&self, vm: Id) -> Result<Vec<Id>> {
        self.db.read(|tx| {
            let _ = tx.virtual_machine(vm)?;
            tx.owners(vm)
        })
    }

    /// Totals up what a team's machines take up.
    pub fn usage(&self, team: Id) -> Result<Usage> {
        self.virtual_machines(team).map(|vms| Usage::of(&vms))
    }

    fn team_of(&self, vm: Id) -> Result<Id> {
        self.db.read(|tx| tx.virtual_machine(vm)).map(|vm| vm.team)
    }
}

/// Decides whether a machine with the given footprint may join a team already using `usage`.
pub fn admit(
    quota: &ResourceQuota,
    usage: &Usage,
    footprint: Footprint,
) -> std::result::Result<(), Conflict> {
    if usage.machines as i64 >= i64::from(quota.total_slots) {
        return Err(Conflict::SlotsExceeded {
            team: quota.team,
            slots: quota.total_slots,
        });
    }
    for &resource in &Resource::ALL {
        let (min, max) = quota.bounds(resource);
        let requested = footprint.get(resource);
        if requested < min || requested > max {
            return Err(Conflict::OutOfBounds {
                resource,
                requested,
                min,
                max,
            });
        }
    }
    for &resource in &Resource::ALL {
        let requested = footprint.get(resource);
        let available = i64::from(quota.cap(resource)) - usage.allocated(resource);
        if i64::from(requested) > available {
            return Err(Conflict::NotAvailable {
                resource,
                requested,
                available,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota() -> ResourceQuota {
        ResourceQuota {
            team: Id::generate(),
            min_vcpu: 1,
            max_vcpu: 4,
            min_disk: 10,
            max_disk: 100,
            min_ram: 1,
            max_ram: 8,
            total_vcpu: 6,
            total_disk: 150,
            total_ram: 12,
            total_slots: 2,
            max_active: 1,
        }
    }

    fn footprint(vcpu: i32, disk: i32, ram: i32) -> Footprint {
        Footprint { vcpu, disk, ram }
    }

    #[test]
    fn admits_within_everything() {
        assert_eq!(admit(&quota(), &Usage::default(), footprint(4, 100, 8)), Ok(()));
    }

    #[test]
    fn slots_are_checked_first() {
        let q = quota();
        let usage = Usage {
            machines: 2,
            ..Usage::default()
        };
        assert_eq!(
            admit(&q, &usage, footprint(100, 0, 0)),
            Err(Conflict::SlotsExceeded {
                team: q.team,
                slots: 2
            })
        );
    }

    #[test]
    fn per_machine_bounds() {
        assert_eq!(
            admit(&quota(), &Usage::default(), footprint(5, 50, 2)),
            Err(Conflict::OutOfBounds {
                resource: Resource::Vcpu,
                requested: 5,
                min: 1,
                max: 4
            })
        );
        assert_eq!(
            admit(&quota(), &Usage::default(), footprint(1, 5, 2)),
            Err(Conflict::OutOfBounds {
                resource: Resource::Disk,
                requested: 5,
                min: 10,
                max: 100
            })
        );
    }

    #[test]
    fn aggregate_caps_name_the_resource() {
        let usage = Usage {
            machines: 1,
            active: 0,
            vcpu: 2,
            disk: 100,
            ram: 4,
        };
        assert_eq!(
            admit(&quota(), &usage, footprint(2, 60, 2)),
            Err(Conflict::NotAvailable {
                resource: Resource::Disk,
                requested: 60,
                available: 50
            })
        );
        assert_eq!(admit(&quota(), &usage, footprint(4, 50, 8)), Ok(()));

        let usage = Usage { ram: 5, ..usage };
        assert_eq!(
            admit(&quota(), &usage, footprint(4, 50, 8)),
            Err(Conflict::NotAvailable {
                resource: Resource::Ram,
                requested: 8,
                available: 7
            })
        );
    }
}
