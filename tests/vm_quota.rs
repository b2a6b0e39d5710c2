mod common;

use crate::common::{ids, small, Fixture, QuotaSpec};
use courselab::{
    error::{Conflict, Entity, Error},
    logic::access::Caller,
    schema::{Footprint, Id, Resource, Usage, VmStatus},
};
use std::{sync::Arc, thread};

fn conflict<T: std::fmt::Debug>(r: Result<T, Error>) -> Conflict {
    match r {
        Err(Error::Conflict(conflict)) => conflict,
        other => panic!("expected a conflict, got {:?}", other),
    }
}

fn forbidden<T: std::fmt::Debug>(r: Result<T, Error>) {
    match r {
        Err(Error::Forbidden(_)) => {}
        other => panic!("expected Forbidden, got {:?}", other),
    }
}

#[test]
fn slots_and_active_limits() {
    let fx = Fixture::new();
    let (team, students) = fx.team_with_quota(2, QuotaSpec::roomy(5, 3));
    let vms = &fx.services.vms;
    let owner = students[0].id;

    let created = (0..5)
        .map(|_| {
            vms.create_virtual_machine(Caller::Student(owner), team.id, owner, small())
                .unwrap()
        })
        .collect::<Vec<_>>();
    assert!(created.iter().all(|vm| vm.status == VmStatus::Off));

    assert_eq!(
        conflict(vms.create_virtual_machine(Caller::Admin, team.id, owner, small())),
        Conflict::SlotsExceeded {
            team: team.id,
            slots: 5
        }
    );
    assert_eq!(vms.virtual_machines(team.id).unwrap().len(), 5);

    for vm in &created[..3] {
        assert!(vms.turn_on(Caller::Student(owner), vm.id).unwrap().is_on());
    }
    assert_eq!(
        conflict(vms.turn_on(Caller::Student(owner), created[3].id)),
        Conflict::ActiveLimitExceeded {
            team: team.id,
            max_active: 3
        }
    );
    assert_eq!(
        vms.virtual_machine(created[3].id).unwrap().status,
        VmStatus::Off
    );

    // Turning a running machine on again doesn't count against the limit.
    assert!(vms.turn_on(Caller::Admin, created[0].id).unwrap().is_on());

    assert!(!vms.turn_off(Caller::Admin, created[0].id).unwrap().is_on());
    assert!(!vms.turn_off(Caller::Admin, created[0].id).unwrap().is_on());
    assert!(vms.turn_on(Caller::Admin, created[3].id).unwrap().is_on());

    let usage = vms.usage(team.id).unwrap();
    assert_eq!(usage.machines, 5);
    assert_eq!(usage.active, 3);
    assert_eq!(usage.vcpu, 5);
    assert_eq!(usage.disk, 50);
    assert_eq!(usage.ram, 10);
}

#[test]
fn per_machine_bounds_and_team_totals() {
    let fx = Fixture::new();
    let quota = QuotaSpec {
        per_vm: Footprint {
            vcpu: 4,
            disk: 100,
            ram: 8,
        },
        totals: Footprint {
            vcpu: 6,
            disk: 150,
            ram: 12,
        },
        slots: 10,
        max_active: 10,
    };
    let (team, students) = fx.team_with_quota(1, quota);
    let vms = &fx.services.vms;
    let owner = students[0].id;
    let create = |vcpu, disk, ram| {
        vms.create_virtual_machine(Caller::Admin, team.id, owner, Footprint { vcpu, disk, ram })
    };

    assert_eq!(
        conflict(create(5, 10, 1)),
        Conflict::OutOfBounds {
            resource: Resource::Vcpu,
            requested: 5,
            min: 1,
            max: 4
        }
    );
    assert_eq!(
        conflict(create(1, 10, 0)),
        Conflict::OutOfBounds {
            resource: Resource::Ram,
            requested: 0,
            min: 1,
            max: 8
        }
    );

    let first = create(4, 100, 8).unwrap();
    assert_eq!(
        conflict(create(2, 60, 4)),
        Conflict::NotAvailable {
            resource: Resource::Disk,
            requested: 60,
            available: 50
        }
    );
    assert_eq!(
        conflict(create(2, 50, 5)),
        Conflict::NotAvailable {
            resource: Resource::Ram,
            requested: 5,
            available: 4
        }
    );
    let _ = create(2, 50, 4).unwrap();

    // Stopped machines still count against the totals.
    assert!(!vms.virtual_machine(first.id).unwrap().is_on());
    assert_eq!(
        conflict(create(1, 1, 1)),
        Conflict::NotAvailable {
            resource: Resource::Vcpu,
            requested: 1,
            available: 0
        }
    );

    vms.delete_virtual_machine(Caller::Admin, first.id).unwrap();
    let _ = create(1, 1, 1).unwrap();
    assert_eq!(
        vms.usage(team.id).unwrap(),
        Usage {
            machines: 2,
            active: 0,
            vcpu: 3,
            disk: 51,
            ram: 5,
        }
    );
}

#[test]
fn machines_need_an_active_team_with_a_quota() {
    let fx = Fixture::new();
    let course = fx.course(2, 2);
    let students = fx.students(&course, 4);
    let vms = &fx.services.vms;

    let pending = fx
        .services
        .teams
        .propose_team(Caller::Admin, course.id, "pending", &ids(&students[..2]))
        .unwrap();
    assert_eq!(
        conflict(vms.create_virtual_machine(
            Caller::Admin,
            pending.team.id,
            students[0].id,
            small()
        )),
        Conflict::TeamNotActive(pending.team.id)
    );

    let team = fx.active_team(&course, "active", &students[2..]);
    match vms.create_virtual_machine(Caller::Admin, team.id, students[2].id, small()) {
        Err(ref err) if err.is_not_found(Entity::Quota) => {}
        other => panic!("expected a missing quota, got {:?}", other),
    }

    let _ = vms
        .set_quota(Caller::Admin, QuotaSpec::roomy(2, 1).for_team(team.id))
        .unwrap();
    assert_eq!(
        conflict(vms.create_virtual_machine(Caller::Admin, team.id, students[0].id, small())),
        Conflict::NotTeamMember {
            student: students[0].id,
            team: team.id
        }
    );
    match vms.create_virtual_machine(Caller::Admin, Id::generate(), students[2].id, small()) {
        Err(ref err) if err.is_not_found(Entity::Team) => {}
        other => panic!("expected a missing team, got {:?}", other),
    }
}

#[test]
fn quotas_are_set_once_by_admins() {
    let fx = Fixture::new();
    let course = fx.course(1, 1);
    let students = fx.students(&course, 1);
    let team = fx.active_team(&course, "solo", &students);
    let vms = &fx.services.vms;
    let quota = QuotaSpec::roomy(3, 2).for_team(team.id);

    forbidden(vms.set_quota(Caller::Student(students[0].id), quota.clone()));

    let mut inverted = quota.clone();
    inverted.max_active = 4;
    match vms.set_quota(Caller::Admin, inverted) {
        Err(Error::Validation(_)) => {}
        other => panic!("expected a validation error, got {:?}", other),
    }

    assert_eq!(vms.set_quota(Caller::Admin, quota.clone()).unwrap(), quota);
    assert_eq!(
        conflict(vms.set_quota(Caller::Admin, quota.clone())),
        Conflict::QuotaAlreadySet(team.id)
    );
    assert_eq!(vms.quota(team.id).unwrap(), quota);
}

#[test]
fn owners_share_and_operate_machines() {
    let fx = Fixture::new();
    let (team, students) = fx.team_with_quota(3, QuotaSpec::roomy(3, 2));
    let vms = &fx.services.vms;
    let (alice, bob, carol) = (students[0].id, students[1].id, students[2].id);

    forbidden(vms.create_virtual_machine(Caller::Student(bob), team.id, alice, small()));
    let vm = vms
        .create_virtual_machine(Caller::Student(alice), team.id, alice, small())
        .unwrap();
    assert_eq!(vms.owners(vm.id).unwrap(), vec![alice]);

    forbidden(vms.turn_on(Caller::Student(bob), vm.id));
    forbidden(vms.add_owner(Caller::Student(bob), bob, vm.id));

    assert!(vms.add_owner(Caller::Student(alice), bob, vm.id).unwrap());
    assert!(!vms.add_owner(Caller::Student(alice), bob, vm.id).unwrap());
    assert!(vms.turn_on(Caller::Student(bob), vm.id).unwrap().is_on());

    let mut owners = vms.owners(vm.id).unwrap();
    owners.sort();
    let mut expected = vec![alice, bob];
    expected.sort();
    assert_eq!(owners, expected);

    let outsider = fx.db.create_student("Outsider", "outsider@example.edu").unwrap();
    assert_eq!(
        conflict(vms.add_owner(Caller::Admin, outsider.id, vm.id)),
        Conflict::NotTeamMember {
            student: outsider.id,
            team: team.id
        }
    );

    assert!(!vms.remove_owner(Caller::Student(bob), carol, vm.id).unwrap());
    assert!(vms.remove_owner(Caller::Student(bob), alice, vm.id).unwrap());
    forbidden(vms.turn_off(Caller::Student(alice), vm.id));
    assert!(vms.remove_owner(Caller::Student(bob), bob, vm.id).unwrap());
    assert!(vms.owners(vm.id).unwrap().is_empty());

    forbidden(vms.delete_virtual_machine(Caller::Student(bob), vm.id));
    vms.delete_virtual_machine(Caller::Admin, vm.id).unwrap();
    match vms.virtual_machine(vm.id) {
        Err(ref err) if err.is_not_found(Entity::VirtualMachine) => {}
        other => panic!("expected the machine to be gone, got {:?}", other),
    }
    match vms.delete_virtual_machine(Caller::Admin, vm.id) {
        Err(ref err) if err.is_not_found(Entity::VirtualMachine) => {}
        other => panic!("expected the machine to be gone, got {:?}", other),
    }
}

#[test]
fn concurrent_creates_never_exceed_the_slots() {
    let fx = Arc::new(Fixture::new());
    let (team, students) = fx.team_with_quota(2, QuotaSpec::roomy(3, 3));
    let owner = students[0].id;

    let threads = (0..8)
        .map(|_| {
            let fx = fx.clone();
            let team_id = team.id;
            thread::spawn(move || {
                fx.services
                    .vms
                    .create_virtual_machine(Caller::Admin, team_id, owner, small())
            })
        })
        .collect::<Vec<_>>();
    let results = threads
        .into_iter()
        .map(|t| t.join().unwrap())
        .collect::<Vec<_>>();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    for r in results.iter().filter(|r| r.is_err()) {
        match r {
            Err(Error::Conflict(Conflict::SlotsExceeded { slots: 3, .. })) => {}
            other => panic!("expected the slots to run out, got {:?}", other),
        }
    }
    assert_eq!(fx.services.vms.virtual_machines(team.id).unwrap().len(), 3);
}

#[test]
fn concurrent_starts_never_exceed_the_active_limit() {
    let fx = Arc::new(Fixture::new());
    let (team, students) = fx.team_with_quota(1, QuotaSpec::roomy(6, 2));
    let owner = students[0].id;
    let machines = (0..6)
        .map(|_| {
            fx.services
                .vms
                .create_virtual_machine(Caller::Admin, team.id, owner, small())
                .unwrap()
                .id
        })
        .collect::<Vec<_>>();

    let threads = machines
        .into_iter()
        .map(|vm| {
            let fx = fx.clone();
            thread::spawn(move || fx.services.vms.turn_on(Caller::Student(owner), vm))
        })
        .collect::<Vec<_>>();
    let started = threads
        .into_iter()
        .map(|t| t.join().unwrap())
        .filter(|r| r.is_ok())
        .count();

    assert_eq!(started, 2);
    assert_eq!(fx.services.vms.usage(team.id).unwrap().active, 2);
}
