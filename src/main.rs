use chrono::Duration;
use courselab::{
    dal::{Mailer, DB},
    logic::{
        access::Caller,
        clock::SystemClock,
        notify::{LogNotifier, MailNotifier, Notifier},
        team::Policy,
        Services,
    },
    schema::{Footprint, Id, ResourceQuota, Usage},
    util::log_err,
};
use failure::{bail, Fallible};
use log::warn;
use serde_json::{json, Value};
use std::{process::exit, sync::Arc};
use structopt::{clap::AppSettings, StructOpt};

fn main() {
    let _ = dotenv::dotenv();

    let options = Options::from_args();
    if let Err(err) = options.start_logger() {
        warn!("Logging couldn't start: {}", err);
    }

    match run(options) {
        Ok(output) => {
            if !output.is_null() {
                println!("{}", output);
            }
        }
        Err(err) => {
            log_err(&err);
            exit(1);
        }
    }
}

fn run(options: Options) -> Fallible<Value> {
    let db = DB::connect(&options.database_url)?;
    let caller = options.caller();
    let services = Services::new(
        db.clone(),
        Arc::new(SystemClock),
        options.notifier()?,
        options.policy()?,
    );
    let (teams, vms) = (&services.teams, &services.vms);

    let output = match options.cmd {
        Command::Migrate => json!({ "migrated": true }),
        Command::AddCourse { name, min, max } => json!(db.create_course(&name, min, max)?),
        Command::EnableCourse { course } => json!(db.set_course_enabled(course, true)?),
        Command::DisableCourse { course } => json!(db.set_course_enabled(course, false)?),
        Command::AddStudent { name, email } => json!(db.create_student(&name, &email)?),
        Command::Enroll { course, student } => json!({ "enrolled": db.enroll(course, student)? }),
        Command::Propose {
            course,
            name,
            members,
        } => {
            let proposal = teams.propose_team(caller, course, &name, &members)?;
            json!({
                "team": proposal.team,
                "members": proposal.members,
                "tokens": proposal.tokens,
                "undelivered": proposal.undelivered,
            })
        }
        Command::Confirm { token } => json!({ "active": teams.confirm(caller, token)? }),
        Command::Reject { token } => {
            let eviction = teams.reject(caller, token)?;
            json!({
                "team": eviction.team,
                "tokens_removed": eviction.tokens_removed,
                "cause": format!("{:?}", eviction.cause).to_lowercase(),
            })
        }
        Command::Sweep => match teams.sweep_expired()? {
            Some(report) => json!({ "evicted": report.evicted, "failed": report.failed }),
            None => bail!("Another sweep is already running"),
        },
        Command::SetQuota { team, limits } => {
            json!(vms.set_quota(caller, limits.into_quota(team))?)
        }
        Command::CreateVm {
            team,
            owner,
            footprint,
        } => json!(vms.create_virtual_machine(caller, team, owner, footprint.into())?),
        Command::VmOn { vm } => json!(vms.turn_on(caller, vm)?),
        Command::VmOff { vm } => json!(vms.turn_off(caller, vm)?),
        Command::AddOwner { vm, student } => {
            json!({ "added": vms.add_owner(caller, student, vm)? })
        }
        Command::RemoveOwner { vm, student } => {
            json!({ "removed": vms.remove_owner(caller, student, vm)? })
        }
        Command::DeleteVm { vm } => {
            vms.delete_virtual_machine(caller, vm)?;
            json!({ "deleted": vm })
        }
        Command::ShowTeam { team } => {
            let quota = match vms.quota(team) {
                Ok(quota) => Some(quota),
                Err(ref err) if err.is_not_found(courselab::error::Entity::Quota) => None,
                Err(err) => return Err(err.into()),
            };
            let machines = vms.virtual_machines(team)?;
            json!({
                "team": teams.team(team)?,
                "members": teams.members(team)?,
                "outstanding_tokens": teams.outstanding_tokens(team)?,
                "quota": quota,
                "usage": Usage::of(&machines),
                "machines": machines,
            })
        }
    };
    Ok(output)
}

#[derive(Debug, StructOpt)]
#[structopt(setting = AppSettings::ColoredHelp)]
pub struct Options {
    /// Turns off message output. Passing once prevents logging to syslog. Passing twice or more
    /// disables all logging.
    #[structopt(short = "q", long = "quiet", parse(from_occurrences))]
    quiet: usize,

    /// Increases the verbosity. Default verbosity is warnings and higher to syslog, info and
    /// higher to the console.
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: usize,

    /// The path to the SQLite database.
    #[structopt(long = "db", env = "DATABASE_URL")]
    pub database_url: String,

    /// The student to act as. Without this, commands run as an administrator.
    #[structopt(long = "as", env = "COURSELAB_AS")]
    acting_as: Option<Id>,

    /// The URL students visit to confirm or reject teams.
    #[structopt(
        long = "public-url",
        env = "PUBLIC_URL",
        default_value = "http://localhost:8080"
    )]
    pub public_url: String,

    /// How many seconds students have to answer a team invitation.
    #[structopt(long = "token-lifetime", env = "TOKEN_LIFETIME", default_value = "3600")]
    pub token_lifetime: i64,

    /// The SMTP server's hostname. Without this, invitations are only logged.
    #[structopt(long = "smtp-host", env = "SMTP_HOST")]
    pub smtp_host: Option<String>,

    /// Whether to make SMTP less secure.
    #[structopt(long = "smtp-insecure")]
    pub smtp_insecure: bool,

    /// The user to authenticate to the SMTP server with. Usually your email address.
    #[structopt(long = "smtp-user", env = "SMTP_USER", default_value = "")]
    pub smtp_user: String,

    /// The password to authenticate to the SMTP server with.
    #[structopt(long = "smtp-pass", env = "SMTP_PASS", default_value = "")]
    pub smtp_pass: String,

    /// The From address for emails. Maybe be of the form "email@host.com" or
    /// "Foo Bar <email@host.com>". Defaults to the SMTP user.
    #[structopt(long = "smtp-from", env = "SMTP_FROM")]
    pub smtp_from: Option<String>,

    /// The syslog server to send logs to.
    #[structopt(short = "s", long = "syslog-server", env = "SYSLOG_SERVER")]
    syslog_server: Option<String>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Creates the database if needed and brings its schema up to date.
    Migrate,

    /// Creates a course.
    AddCourse {
        /// The course's name.
        name: String,

        /// The fewest members a team may have.
        #[structopt(long = "min", default_value = "1")]
        min: i32,

        /// The most members a team may have.
        #[structopt(long = "max", default_value = "4")]
        max: i32,
    },

    /// Opens a course to team proposals.
    EnableCourse { course: Id },

    /// Stops a course from accepting team proposals.
    DisableCourse { course: Id },

    /// Creates a student.
    AddStudent { name: String, email: String },

    /// Enrolls a student in a course.
    Enroll { course: Id, student: Id },

    /// Proposes a team, inviting every member to confirm it.
    Propose {
        course: Id,
        name: String,
        #[structopt(required = true)]
        members: Vec<Id>,
    },

    /// Confirms a team invitation.
    Confirm { token: Id },

    /// Rejects a team invitation, cancelling the team.
    Reject { token: Id },

    /// Cancels every team with an invitation that has run out.
    Sweep,

    /// Sets a team's resource quota.
    SetQuota {
        team: Id,
        #[structopt(flatten)]
        limits: QuotaLimits,
    },

    /// Creates a stopped virtual machine.
    CreateVm {
        team: Id,
        owner: Id,
        #[structopt(flatten)]
        footprint: FootprintArgs,
    },

    /// Starts a virtual machine.
    VmOn { vm: Id },

    /// Stops a virtual machine.
    VmOff { vm: Id },

    /// Gives a team member access to a virtual machine.
    AddOwner { vm: Id, student: Id },

    /// Takes away a student's access to a virtual machine.
    RemoveOwner { vm: Id, student: Id },

    /// Deletes a virtual machine.
    DeleteVm { vm: Id },

    /// Shows a team, its members, outstanding invitations, quota, and machines.
    ShowTeam { team: Id },
}

#[derive(Debug, StructOpt)]
struct QuotaLimits {
    /// The fewest vCPUs a machine may have.
    #[structopt(long = "min-vcpu", default_value = "1")]
    min_vcpu: i32,

    /// The most vCPUs a machine may have.
    #[structopt(long = "max-vcpu")]
    max_vcpu: i32,

    /// The least disk a machine may have.
    #[structopt(long = "min-disk", default_value = "1")]
    min_disk: i32,

    /// The most disk a machine may have.
    #[structopt(long = "max-disk")]
    max_disk: i32,

    /// The least memory a machine may have.
    #[structopt(long = "min-ram", default_value = "1")]
    min_ram: i32,

    /// The most memory a machine may have.
    #[structopt(long = "max-ram")]
    max_ram: i32,

    /// The most vCPUs all of the team's machines may have together.
    #[structopt(long = "total-vcpu")]
    total_vcpu: i32,

    /// The most disk all of the team's machines may have together.
    #[structopt(long = "total-disk")]
    total_disk: i32,

    /// The most memory all of the team's machines may have together.
    #[structopt(long = "total-ram")]
    total_ram: i32,

    /// The most machines the team may have.
    #[structopt(long = "slots")]
    total_slots: i32,

    /// The most machines the team may have running at once.
    #[structopt(long = "max-active")]
    max_active: i32,
}

impl QuotaLimits {
    fn into_quota(self, team: Id) -> ResourceQuota {
        ResourceQuota {
            team,
            min_vcpu: self.min_vcpu,
            max_vcpu: self.max_vcpu,
            min_disk: self.min_disk,
            max_disk: self.max_disk,
            min_ram: self.min_ram,
            max_ram: self.max_ram,
            total_vcpu: self.total_vcpu,
            total_disk: self.total_disk,
            total_ram: self.total_ram,
            total_slots: self.total_slots,
            max_active: self.max_active,
        }
    }
}

#[derive(Debug, StructOpt)]
struct FootprintArgs {
    /// Virtual CPUs.
    #[structopt(long = "vcpu")]
    vcpu: i32,

    /// Disk space.
    #[structopt(long = "disk")]
    disk: i32,

    /// Memory.
    #[structopt(long = "ram")]
    ram: i32,
}

impl From<FootprintArgs> for Footprint {
    fn from(args: FootprintArgs) -> Footprint {
        Footprint {
            vcpu: args.vcpu,
            disk: args.disk,
            ram: args.ram,
        }
    }
}

impl Options {
    /// The principal commands run as.
    pub fn caller(&self) -> Caller {
        match self.acting_as {
            Some(student) => Caller::Student(student),
            None => Caller::Admin,
        }
    }

    /// The team formation policy given by the flags.
    pub fn policy(&self) -> Fallible<Policy> {
        if self.token_lifetime <= 0 {
            bail!("The token lifetime must be positive, not {}", self.token_lifetime);
        }
        Ok(Policy {
            token_lifetime: Duration::seconds(self.token_lifetime),
            public_url: self.public_url.clone(),
        })
    }

    /// Connects to the mail server if one was given, or falls back to logging invitations.
    pub fn notifier(&self) -> Fallible<Arc<dyn Notifier>> {
        let host = match self.smtp_host {
            Some(ref host) => host,
            None => return Ok(Arc::new(LogNotifier)),
        };
        let from = self.smtp_from.as_ref().unwrap_or(&self.smtp_user);
        let mailer = Mailer::connect(
            host,
            !self.smtp_insecure,
            self.smtp_user.clone(),
            self.smtp_pass.clone(),
            from,
        )?;
        Ok(Arc::new(MailNotifier::new(mailer)))
    }

    /// Sets up logging as specified by the `-q`, `-s`, and `-v` flags.
    pub fn start_logger(&self) -> Fallible<()> {
        use fern::Dispatch;
        use log::LevelFilter;

        if self.quiet >= 2 {
            return Ok(());
        }

        let (console_ll, syslog_ll) = match self.verbose {
            0 => (LevelFilter::Info, LevelFilter::Warn),
            1 => (LevelFilter::Debug, LevelFilter::Info),
            2 => (LevelFilter::Trace, LevelFilter::Debug),
            _ => (LevelFilter::Trace, LevelFilter::Trace),
        };

        let fern = Dispatch::new().chain(
            Dispatch::new()
                .level(console_ll)
                .format(move |out, message, record| {
                    out.finish(format_args!("[{}] {}", record.level(), message))
                })
                .chain(std::io::stderr()),
        );

        let fern = if self.quiet == 0 {
            let formatter = syslog::Formatter3164 {
                facility: syslog::Facility::LOG_DAEMON,
                hostname: hostname::get().ok().and_then(|h| h.into_string().ok()),
                process: "courselab".to_owned(),
                pid: std::process::id(),
            };

            let syslog = if let Some(ref server) = self.syslog_server {
                syslog::tcp(formatter, server.as_str()).map_err(failure::SyncFailure::new)?
            } else {
                syslog::unix(formatter.clone())
                    .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
                    .or_else(|_| {
                        syslog::udp(formatter.clone(), ("127.0.0.1", 0), ("127.0.0.1", 514))
                    })
                    .map_err(failure::SyncFailure::new)?
            };

            fern.chain(Dispatch::new().level(syslog_ll).chain(syslog))
        } else {
            fern
        };

        fern.apply()?;
        Ok(())
    }
}
