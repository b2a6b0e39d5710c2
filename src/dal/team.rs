//! The team store: teams, their members, and their outstanding confirmation tokens.

use crate::{
    dal::{
        schema::{confirmation_tokens, resource_quotas, students, team_members, teams},
        Tx,
    },
    error::{Entity, Error, Result},
    schema::{ConfirmationToken, Id, Student, Team, TeamStatus},
};
use chrono::NaiveDateTime;
use diesel::{
    dsl::{delete, exists, insert_into, select, update},
    prelude::*,
};

impl<'a> Tx<'a> {
    /// Gets a team by ID.
    pub(crate) fn team(&self, team: Id) -> Result<Team> {
        self.find_team(team)?
            .ok_or_else(|| Error::not_found(Entity::Team, team))
    }

    /// Gets a team by ID, if it still exists.
    pub(crate) fn find_team(&self, team: Id) -> Result<Option<Team>> {
        let team = teams::table
            .find(team)
            .get_result::<Team>(self.conn)
            .optional()?;
        Ok(team)
    }

    /// Gets the team in a course with the given name, if there is one.
    pub(crate) fn team_by_name(&self, course: Id, name: &str) -> Result<Option<Team>> {
        let team = teams::table
            .filter(teams::course_id.eq(course))
            .filter(teams::name.eq(name))
            .get_result::<Team>(self.conn)
            .optional()?;
        Ok(team)
    }

    /// Gets a team's members, ordered by name.
    pub(crate) fn members(&self, team: Id) -> Result<Vec<Student>> {
        let members = team_members::table
            .inner_join(students::table)
            .filter(team_members::team_id.eq(team))
            .select(students::all_columns)
            .order((students::name.asc(), students::id.asc()))
            .load::<Student>(self.conn)?;
        Ok(members)
    }

    /// Returns whether the student is on the team.
    pub(crate) fn is_member(&self, team: Id, student: Id) -> Result<bool> {
        let member = select(exists(
            team_members::table
                .filter(team_members::team_id.eq(team))
                .filter(team_members::student_id.eq(student)),
        ))
        .get_result(self.conn)?;
        Ok(member)
    }

    /// Gets the teams a student is a member of, optionally only those in one course.
    pub(crate) fn teams_of(&self, student: Id, course: Option<Id>) -> Result<Vec<Team>> {
        let mut query = teams::table
            .inner_join(team_members::table)
            .filter(team_members::student_id.eq(student))
            .select(teams::all_columns)
            .into_boxed();
        if let Some(course) = course {
            query = query.filter(teams::course_id.eq(course));
        }
        let teams = query
            .order(teams::proposed_at.asc())
            .load::<Team>(self.conn)?;
        Ok(teams)
    }

    /// Gets the student's active team in a course, if they have one.
    pub(crate) fn active_team_of(&self, student: Id, course: Id) -> Result<Option<Team>> {
        let team = teams::table
            .inner_join(team_members::table)
            .filter(team_members::student_id.eq(student))
            .filter(teams::course_id.eq(course))
            .filter(teams::status.eq(TeamStatus::Active))
            .select(teams::all_columns)
            .first::<Team>(self.conn)
            .optional()?;
        Ok(team)
    }

    /// Creates an unconfirmed team with the given members. Membership is fixed from here on.
    pub(crate) fn insert_team(
        &self,
        course: Id,
        name: &str,
        members: &[Id],
        proposed_at: NaiveDateTime,
    ) -> Result<Team> {
        let id = Id::generate();
        let _ = insert_into(teams::table)
            .values((
                teams::id.eq(id),
                teams::course_id.eq(course),
                teams::name.eq(name),
                teams::status.eq(TeamStatus::Unconfirmed),
                teams::proposed_at.eq(proposed_at),
            ))
            .execute(self.conn)?;
        for &student in members {
            let _ = insert_into(team_members::table)
                .values((
                    team_members::team_id.eq(id),
                    team_members::student_id.eq(student),
                ))
                .execute(self.conn)?;
        }
        self.team(id)
    }

    /// Marks a team as confirmed by all of its members.
    pub(crate) fn activate_team(&self, team: Id) -> Result<()> {
        let n = update(teams::table.find(team))
            .set(teams::status.eq(TeamStatus::Active))
            .execute(self.conn)?;
        if n == 0 {
            return Err(Error::not_found(Entity::Team, team));
        }
        Ok(())
    }

    /// Deletes a team along with its members, tokens, and quota, returning how many tokens were
    /// outstanding. Evicting a team that's already gone does nothing.
    pub(crate) fn evict_team(&self, team: Id) -> Result<usize> {
        let tokens =
            delete(confirmation_tokens::table.filter(confirmation_tokens::team_id.eq(team)))
                .execute(self.conn)?;
        let _ = delete(team_members::table.filter(team_members::team_id.eq(team)))
            .execute(self.conn)?;
        let _ = delete(resource_quotas::table.filter(resource_quotas::team_id.eq(team)))
            .execute(self.conn)?;
        let _ = delete(teams::table.find(team)).execute(self.conn)?;
        Ok(tokens)
    }

    /// Issues a confirmation token to one member of a team.
    pub(crate) fn insert_token(
        &self,
        team: Id,
        student: Id,
        expires: NaiveDateTime,
    ) -> Result<ConfirmationToken> {
        let token = ConfirmationToken {
            id: Id::generate(),
            team,
            student,
            expires,
        };
        let _ = insert_into(confirmation_tokens::table)
            .values((
                confirmation_tokens::id.eq(token.id),
                confirmation_tokens::team_id.eq(team),
                confirmation_tokens::student_id.eq(student),
                confirmation_tokens::expires.eq(expires),
            ))
            .execute(self.conn)?;
        Ok(token)
    }

    /// Gets a confirmation token.
    pub(crate) fn token(&self, token: Id) -> Result<ConfirmationToken> {
        confirmation_tokens::table
            .find(token)
            .get_result::<ConfirmationToken>(self.conn)
            .optional()?
            .ok_or_else(|| Error::not_found(Entity::Token, token))
    }

    /// Gets a team's outstanding tokens.
    pub(crate) fn tokens(&self, team: Id) -> Result<Vec<ConfirmationToken>> {
        let tokens = confirmation_tokens::table
            .filter(confirmation_tokens::team_id.eq(team))
            .order(confirmation_tokens::expires.asc())
            .load::<ConfirmationToken>(self.conn)?;
        Ok(tokens)
    }

    /// Counts a team's outstanding tokens.
    pub(crate) fn count_tokens(&self, team: Id) -> Result<i64> {
        let n = confirmation_tokens::table
            .filter(confirmation_tokens::team_id.eq(team))
            .count()
            .get_result(self.conn)?;
        Ok(n)
    }

    /// Consumes a token, returning whether it was still there.
    pub(crate) fn delete_token(&self, token: Id) -> Result<bool> {
        let n = delete(confirmation_tokens::table.find(token)).execute(self.conn)?;
        Ok(n != 0)
    }

    /// Returns whether the team has any token that has expired as of `now`.
    pub(crate) fn has_expired_tokens(&self, team: Id, now: NaiveDateTime) -> Result<bool> {
        let n: i64 = confirmation_tokens::table
            .filter(confirmation_tokens::team_id.eq(team))
            .filter(confirmation_tokens::expires.le(now))
            .count()
            .get_result(self.conn)?;
        Ok(n != 0)
    }

    /// Lists the teams holding at least one token that has expired as of `now`.
    pub(crate) fn teams_with_expired_tokens(&self, now: NaiveDateTime) -> Result<Vec<Id>> {
        let teams = confirmation_tokens::table
            .filter(confirmation_tokens::expires.le(now))
            .select(confirmation_tokens::team_id)
            .distinct()
            .load::<Id>(self.conn)?;
        Ok(teams)
    }
}
