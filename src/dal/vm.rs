//! The quota store: each team's resource quota and virtual machines.

use crate::{
    dal::{
        schema::{resource_quotas, virtual_machines, vm_owners},
        Tx,
    },
    error::{Entity, Error, Result},
    schema::{Footprint, Id, ResourceQuota, VirtualMachine, VmStatus},
};
use chrono::NaiveDateTime;
use diesel::{
    dsl::{delete, exists, insert_into, select, update},
    prelude::*,
};

impl<'a> Tx<'a> {
    /// Gets a team's quota, if it has one.
    pub(crate) fn find_quota(&self, team: Id) -> Result<Option<ResourceQuota>> {
        let quota = resource_quotas::table
            .find(team)
            .get_result::<ResourceQuota>(self.conn)
            .optional()?;
        Ok(quota)
    }

    /// Gets a team's quota.
    pub(crate) fn quota(&self, team: Id) -> Result<ResourceQuota> {
        self.find_quota(team)?
            .ok_or_else(|| Error::not_found(Entity::Quota, team))
    }

    /// Stores a team's quota.
    pub(crate) fn insert_quota(&self, quota: &ResourceQuota) -> Result<()> {
        let _ = insert_into(resource_quotas::table)
            .values((
                resource_quotas::team_id.eq(quota.team),
                resource_quotas::min_vcpu.eq(quota.min_vcpu),
                resource_quotas::max_vcpu.eq(quota.max_vcpu),
                resource_quotas::min_disk.eq(quota.min_disk),
                resource_quotas::max_disk.eq(quota.max_disk),
                resource_quotas::min_ram.eq(quota.min_ram),
                resource_quotas::max_ram.eq(quota.max_ram),
                resource_quotas::total_vcpu.eq(quota.total_vcpu),
                resource_quotas::total_disk.eq(quota.total_disk),
                resource_quotas::total_ram.eq(quota.total_ram),
                resource_quotas::total_slots.eq(quota.total_slots),
                resource_quotas::max_active.eq(quota.max_active),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    /// Gets a virtual machine.
    pub(crate) fn virtual_machine(&self, vm: Id) -> Result<VirtualMachine> {
        virtual_machines::table
            .find(vm)
            .get_result::<VirtualMachine>(self.conn)
            .optional()?
            .ok_or_else(|| Error::not_found(Entity::VirtualMachine, vm))
    }

    /// Gets all of a team's virtual machines, oldest first.
    pub(crate) fn virtual_machines(&self, team: Id) -> Result<Vec<VirtualMachine>> {
        let vms = virtual_machines::table
            .filter(virtual_machines::team_id.eq(team))
            .order((virtual_machines::created_at.asc(), virtual_machines::id.asc()))
            .load::<VirtualMachine>(self.conn)?;
        Ok(vms)
    }

    /// Creates a stopped virtual machine with a single owner.
    pub(crate) fn insert_vm(
        &self,
        team: Id,
        owner: Id,
        footprint: Footprint,
        created_at: NaiveDateTime,
    ) -> Result<VirtualMachine> {
        let id = Id::generate();
        let _ = insert_into(virtual_machines::table)
            .values((
                virtual_machines::id.eq(id),
                virtual_machines::team_id.eq(team),
                virtual_machines::vcpu.eq(footprint.vcpu),
                virtual_machines::disk.eq(footprint.disk),
                virtual_machines::ram.eq(footprint.ram),
                virtual_machines::status.eq(VmStatus::Off),
                virtual_machines::created_at.eq(created_at),
            ))
            .execute(self.conn)?;
        let _ = self.add_owner(id, owner)?;
        self.virtual_machine(id)
    }

    /// Starts or stops a virtual machine.
    pub(crate) fn set_vm_status(&self, vm: Id, status: VmStatus) -> Result<()> {
        let n = update(virtual_machines::table.find(vm))
            .set(virtual_machines::status.eq(status))
            .execute(self.conn)?;
        if n == 0 {
            return Err(Error::not_found(Entity::VirtualMachine, vm));
        }
        Ok(())
    }

    /// Deletes a virtual machine and its ownership links, returning whether it existed.
    pub(crate) fn delete_vm(&self, vm: Id) -> Result<bool> {
        let _ = delete(vm_owners::table.filter(vm_owners::vm_id.eq(vm))).execute(self.conn)?;
        let n = delete(virtual_machines::table.find(vm)).execute(self.conn)?;
        Ok(n != 0)
    }

    /// Gets the IDs of a virtual machine's owners.
    pub(crate) fn owners(&self, vm: Id) -> Result<Vec<Id>> {
        let owners = vm_owners::table
            .filter(vm_owners::vm_id.eq(vm))
            .select(vm_owners::student_id)
            .order(vm_owners::student_id.asc())
            .load::<Id>(self.conn)?;
        Ok(owners)
    }

    /// Returns whether a student owns a virtual machine.
    pub(crate) fn is_owner(&self, vm: Id, student: Id) -> Result<bool> {
        let owner = select(exists(
            vm_owners::table
                .filter(vm_owners::vm_id.eq(vm))
                .filter(vm_owners::student_id.eq(student)),
        ))
        .get_result(self.conn)?;
        Ok(owner)
    }

    /// Adds an owner, returning false if they already were one.
    pub(crate) fn add_owner(&self, vm: Id, student: Id) -> Result<bool> {
        if self.is_owner(vm, student)? {
            return Ok(false);
        }
        let _ = insert_into(vm_owners::table)
            .values((vm_owners::vm_id.eq(vm), vm_owners::student_id.eq(student)))
            .execute(self.conn)?;
        Ok(true)
    }

    /// Removes an owner, returning false if they weren't one.
    pub(crate) fn remove_owner(&self, vm: Id, student: Id) -> Result<bool> {
        let n = delete(
            vm_owners::table
                .filter(vm_owners::vm_id.eq(vm))
                .filter(vm_owners::student_id.eq(student)),
        )
        .execute(self.conn)?;
        Ok(n != 0)
    }
}
