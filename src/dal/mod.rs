//! Bindings to the database.
//!
//! > **DAL**, for lack of a better term (borrowing this one from "data access layer" since I don't
//! > want to use "model"), is the only module that does any talking to the database, or any other
//! > IO or interaction with other kinds of externalized state for that matter.
//!
//! Queries are methods on `Tx`, a borrowed connection. `DB::atomically` runs a closure over a
//! `Tx` inside a `BEGIN IMMEDIATE` transaction, which is how the logic module makes a
//! read-check-write sequence a single unit. Both stay inside the crate: outside of course and
//! student bookkeeping, teams and machines only change through the `logic` module.

mod mailer;
#[allow(proc_macro_derive_resolution_fallback, unused_import_braces)]
mod schema;
mod sql_types;
mod team;
mod vm;

embed_migrations!("migrations");

pub use crate::dal::mailer::Mailer;
use crate::{
    dal::schema::{courses, enrollments, students},
    error::{Entity, Error, Result},
    schema::{Course, Id, Student},
};
use diesel::{
    connection::SimpleConnection,
    dsl::{exists, insert_into, select, update},
    prelude::*,
    r2d2::{ConnectionManager, CustomizeConnection, Pool},
};
use failure::Fallible;
use std::{sync::Arc, time::Duration};

/// How long a connection waits on another connection's write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// A pool of connections to the database.
///
/// Raw queries aren't reachable from outside the crate:
///
/// ```compile_fail
/// let db = courselab::dal::DB::connect(":memory:").unwrap();
/// let team = courselab::schema::Id::generate();
/// db.atomically(|tx| tx.activate_team(team)).unwrap();
/// ```
#[allow(missing_debug_implementations)]
#[derive(Clone)]
pub struct DB {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
}

impl DB {
    /// Connects to the database at the given path or URL, creating it if needed, and brings its
    /// schema up to date.
    pub fn connect(database_url: &str) -> Fallible<DB> {
        let pool = Pool::builder()
            .connection_customizer(Box::new(ConnectionOptions))
            .build(ConnectionManager::new(database_url))?;
        embedded_migrations::run(&*pool.get()?)?;
        Ok(DB {
            pool: Arc::new(pool),
        })
    }

    /// Runs `func` inside a transaction that holds the database's write lock from the start, so
    /// nothing it reads can change before it commits. Returning an error rolls the transaction
    /// back.
    pub(crate) fn atomically<F, T>(&self, func: F) -> Result<T>
    where
        F: FnOnce(&Tx) -> Result<T>,
    {
        let conn = self.pool.get()?;
        let tx = Tx { conn: &*conn };
        conn.immediate_transaction(|| func(&tx))
    }

    /// Runs `func` on a connection, outside of any transaction. Use this for reads only.
    pub(crate) fn read<F, T>(&self, func: F) -> Result<T>
    where
        F: FnOnce(&Tx) -> Result<T>,
    {
        let conn = self.pool.get()?;
        func(&Tx { conn: &*conn })
    }

    /// Creates a course.
    pub fn create_course(
        &self,
        name: &str,
        min_team_size: i32,
        max_team_size: i32,
    ) -> Result<Course> {
        if name.trim().is_empty() {
            return Err(Error::Validation("a course needs a name".to_owned()));
        }
        if min_team_size < 1 || min_team_size > max_team_size {
            return Err(Error::Validation(format!(
                "team sizes {}..={} are not a valid range",
                min_team_size, max_team_size
            )));
        }
        self.atomically(|tx| tx.insert_course(name.trim(), min_team_size, max_team_size))
    }

    /// Opens or closes a course to team proposals.
    pub fn set_course_enabled(&self, course: Id, enabled: bool) -> Result<Course> {
        self.atomically(|tx| {
            let n = update(courses::table.find(course))
                .set(courses::enabled.eq(enabled))
                .execute(tx.conn)?;
            if n == 0 {
                return Err(Error::not_found(Entity::Course, course));
            }
            tx.course(course)
        })
    }

    /// Creates a student.
    pub fn create_student(&self, name: &str, email: &str) -> Result<Student> {
        if name.trim().is_empty() || !email.contains('@') {
            return Err(Error::Validation(format!(
                "{:?} <{}> is not a valid student",
                name, email
            )));
        }
        self.atomically(|tx| tx.insert_student(name.trim(), email.trim()))
    }

    /// Enrolls a student in a course, returning false if they already were.
    pub fn enroll(&self, course: Id, student: Id) -> Result<bool> {
        self.atomically(|tx| {
            let _ = tx.course(course)?;
            let _ = tx.student(student)?;
            if tx.is_enrolled(course, student)? {
                return Ok(false);
            }
            let _ = insert_into(enrollments::table)
                .values((
                    enrollments::course_id.eq(course),
                    enrollments::student_id.eq(student),
                ))
                .execute(tx.conn)?;
            Ok(true)
        })
    }

    /// Gets a course by ID.
    pub fn get_course(&self, course: Id) -> Result<Course> {
        self.read(|tx| tx.course(course))
    }

    /// Gets a student by ID.
    pub fn get_student(&self, student: Id) -> Result<Student> {
        self.read(|tx| tx.student(student))
    }
}

/// A borrowed connection, possibly inside a transaction.
#[allow(missing_debug_implementations)]
pub(crate) struct Tx<'a> {
    conn: &'a SqliteConnection,
}

impl<'a> Tx<'a> {
    /// Gets a course by ID.
    pub(crate) fn course(&self, course: Id) -> Result<Course> {
        courses::table
            .find(course)
            .get_result::<Course>(self.conn)
            .optional()?
            .ok_or_else(|| Error::not_found(Entity::Course, course))
    }

    /// Gets a student by ID.
    pub(crate) fn student(&self, student: Id) -> Result<Student> {
        students::table
            .find(student)
            .get_result::<Student>(self.conn)
            .optional()?
            .ok_or_else(|| Error::not_found(Entity::Student, student))
    }

    /// Returns whether the student is enrolled in the course.
    pub(crate) fn is_enrolled(&self, course: Id, student: Id) -> Result<bool> {
        let enrolled = select(exists(
            enrollments::table
                .filter(enrollments::course_id.eq(course))
                .filter(enrollments::student_id.eq(student)),
        ))
        .get_result(self.conn)?;
        Ok(enrolled)
    }

    fn insert_course(
        &self,
        name: &str,
        min_team_size: i32,
        max_team_size: i32,
    ) -> Result<Course> {
        let id = Id::generate();
        let _ = insert_into(courses::table)
            .values((
                courses::id.eq(id),
                courses::name.eq(name),
                courses::min_team_size.eq(min_team_size),
                courses::max_team_size.eq(max_team_size),
                courses::enabled.eq(true),
            ))
            .execute(self.conn)?;
        self.course(id)
    }

    fn insert_student(&self, name: &str, email: &str) -> Result<Student> {
        let id = Id::generate();
        let _ = insert_into(students::table)
            .values((
                students::id.eq(id),
                students::name.eq(name),
                students::email.eq(email),
            ))
            .execute(self.conn)?;
        self.student(id)
    }
}

/// Per-connection settings. SQLite turns foreign keys off by default, and fails immediately on
/// lock contention unless given a busy timeout.
#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(
        &self,
        conn: &mut SqliteConnection,
    ) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {}; PRAGMA journal_mode = WAL;",
            BUSY_TIMEOUT.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}
