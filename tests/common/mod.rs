//! A fresh database, a clock that only moves when told to, and a notifier that remembers what it
//! was asked to deliver.

#![allow(dead_code)]

use antidote::Mutex;
use chrono::{DateTime, Duration, Utc};
use courselab::{
    dal::DB,
    logic::{
        access::Caller,
        clock::Clock,
        notify::{Invitation, Notifier},
        team::Policy,
        Services,
    },
    schema::{Course, Footprint, Id, ResourceQuota, Student, Team},
};
use diesel::{connection::SimpleConnection, Connection, SqliteConnection};
use failure::{bail, Fallible};
use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc,
    },
};
use tempfile::TempDir;

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    hold: Mutex<Option<Hold>>,
}

/// Parks the next reader of the clock until released.
struct Hold {
    reached: Sender<()>,
    release: Receiver<()>,
}

impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock {
            now: Mutex::new("2026-10-16T12:00:00Z".parse().unwrap()),
            hold: Mutex::new(None),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }

    /// Makes the next call to `now` block. Returns a receiver that fires once that call is
    /// waiting, and a sender that lets it continue.
    pub fn hold_next(&self) -> (Receiver<()>, Sender<()>) {
        let (reached, reached_rx) = channel();
        let (release_tx, release) = channel();
        *self.hold.lock() = Some(Hold { reached, release });
        (reached_rx, release_tx)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let hold = self.hold.lock().take();
        if let Some(hold) = hold {
            hold.reached.send(()).unwrap();
            hold.release.recv().unwrap();
        }
        *self.now.lock()
    }
}

#[derive(Clone, Debug)]
pub struct Delivery {
    pub email: String,
    pub confirm_link: String,
    pub reject_link: String,
    pub team: String,
}

pub struct RecordingNotifier {
    pub delivered: Mutex<Vec<Delivery>>,
    pub failing: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> RecordingNotifier {
        RecordingNotifier {
            delivered: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_for(&self, email: &str) {
        let _ = self.failing.lock().insert(email.to_owned());
    }

    pub fn delivered(&self) -> Vec<Delivery> {
        self.delivered.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn deliver(
        &self,
        recipient: &Student,
        confirm_link: &str,
        reject_link: &str,
        invitation: &Invitation,
    ) -> Fallible<()> {
        if self.failing.lock().contains(&recipient.email) {
            bail!("mailbox {} is full", recipient.email);
        }
        self.delivered.lock().push(Delivery {
            email: recipient.email.clone(),
            confirm_link: confirm_link.to_owned(),
            reject_link: reject_link.to_owned(),
            team: invitation.team.name.clone(),
        });
        Ok(())
    }
}

pub struct Fixture {
    pub db: DB,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub services: Services,
    pub path: PathBuf,
    _dir: TempDir,
}

impl Fixture {
    pub fn new() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courselab.db");
        let db = DB::connect(path.to_str().unwrap()).unwrap();
        let clock = Arc::new(ManualClock::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let policy = Policy {
            token_lifetime: Duration::hours(1),
            public_url: "https://lab.example.edu/".to_owned(),
        };
        let services = Services::new(db.clone(), clock.clone(), notifier.clone(), policy);
        Fixture {
            db,
            clock,
            notifier,
            services,
            path,
            _dir: dir,
        }
    }

    /// Runs SQL on a connection of its own, behind the services' back.
    pub fn tamper(&self, sql: &str) {
        let conn = SqliteConnection::establish(self.path.to_str().unwrap()).unwrap();
        conn.batch_execute(sql).unwrap();
    }

    pub fn course(&self, min: i32, max: i32) -> Course {
        let name = format!("CSCI {}", Id::generate());
        self.db.create_course(&name, min, max).unwrap()
    }

    /// Creates `n` students, all enrolled in the course.
    pub fn students(&self, course: &Course, n: usize) -> Vec<Student> {
        (0..n)
            .map(|i| {
                let name = format!("Student {}", i + 1);
                let email = format!("s{}.{}@example.edu", i + 1, Id::generate());
                let student = self.db.create_student(&name, &email).unwrap();
                assert!(self.db.enroll(course.id, student.id).unwrap());
                student
            })
            .collect()
    }

    /// Proposes a team and has every member confirm it.
    pub fn active_team(&self, course: &Course, name: &str, members: &[Student]) -> Team {
        let ids = ids(members);
        let proposal = self
            .services
            .teams
            .propose_team(Caller::Admin, course.id, name, &ids)
            .unwrap();
        let mut activated = false;
        for token in &proposal.tokens {
            activated = self
                .services
                .teams
                .confirm(Caller::Student(token.student), token.id)
                .unwrap();
        }
        assert!(activated);
        self.services.teams.team(proposal.team.id).unwrap()
    }

    /// An active team of `members` students with the given quota.
    pub fn team_with_quota(&self, members: usize, quota: QuotaSpec) -> (Team, Vec<Student>) {
        let course = self.course(1, members as i32);
        let students = self.students(&course, members);
        let team = self.active_team(&course, "Lambdas", &students);
        let _ = self
            .services
            .vms
            .set_quota(Caller::Admin, quota.for_team(team.id))
            .unwrap();
        (team, students)
    }
}

pub fn ids(students: &[Student]) -> Vec<Id> {
    students.iter().map(|s| s.id).collect()
}

/// Quota values without a team attached.
#[derive(Clone, Copy, Debug)]
pub struct QuotaSpec {
    pub per_vm: Footprint,
    pub totals: Footprint,
    pub slots: i32,
    pub max_active: i32,
}

impl QuotaSpec {
    pub fn roomy(slots: i32, max_active: i32) -> QuotaSpec {
        QuotaSpec {
            per_vm: Footprint {
                vcpu: 4,
                disk: 100,
                ram: 16,
            },
            totals: Footprint {
                vcpu: 100,
                disk: 10_000,
                ram: 1_000,
            },
            slots,
            max_active,
        }
    }

    pub fn for_team(self, team: Id) -> ResourceQuota {
        ResourceQuota {
            team,
            min_vcpu: 1,
            max_vcpu: self.per_vm.vcpu,
            min_disk: 1,
            max_disk: self.per_vm.disk,
            min_ram: 1,
            max_ram: self.per_vm.ram,
            total_vcpu: self.totals.vcpu,
            total_disk: self.totals.disk,
            total_ram: self.totals.ram,
            total_slots: self.slots,
            max_active: self.max_active,
        }
    }
}

pub fn small() -> Footprint {
    Footprint {
        vcpu: 1,
        disk: 10,
        ram: 2,
    }
}
