//! How the schema types are stored. SQLite has no UUID or enum types, so everything here is
//! stored as text.

use crate::schema::{Id, TeamStatus, VmStatus};
use diesel::{
    backend::Backend,
    deserialize::{self, FromSql},
    serialize::{self, Output, ToSql},
    sql_types::Text,
    sqlite::Sqlite,
};
use std::io::Write;

impl ToSql<Text, Sqlite> for Id {
    fn to_sql<W: Write>(&self, out: &mut Output<W, Sqlite>) -> serialize::Result {
        ToSql::<Text, Sqlite>::to_sql(&self.0.to_string(), out)
    }
}

impl FromSql<Text, Sqlite> for Id {
    fn from_sql(value: Option<&<Sqlite as Backend>::RawValue>) -> deserialize::Result<Self> {
        let text = <String as FromSql<Text, Sqlite>>::from_sql(value)?;
        Ok(Id(text.parse()?))
    }
}

impl ToSql<Text, Sqlite> for TeamStatus {
    fn to_sql<W: Write>(&self, out: &mut Output<W, Sqlite>) -> serialize::Result {
        let s = match *self {
            TeamStatus::Unconfirmed => "unconfirmed",
            TeamStatus::Active => "active",
        };
        ToSql::<Text, Sqlite>::to_sql(s, out)
    }
}

impl FromSql<Text, Sqlite> for TeamStatus {
    fn from_sql(value: Option<&<Sqlite as Backend>::RawValue>) -> deserialize::Result<Self> {
        match <String as FromSql<Text, Sqlite>>::from_sql(value)?.as_str() {
            "unconfirmed" => Ok(TeamStatus::Unconfirmed),
            "active" => Ok(TeamStatus::Active),
            other => Err(format!("Unknown team status {:?}", other).into()),
        }
    }
}

impl ToSql<Text, Sqlite> for VmStatus {
    fn to_sql<W: Write>(&self, out: &mut Output<W, Sqlite>) -> serialize::Result {
        let s = match *self {
            VmStatus::Off => "off",
            VmStatus::On => "on",
        };
        ToSql::<Text, Sqlite>::to_sql(s, out)
    }
}

impl FromSql<Text, Sqlite> for VmStatus {
    fn from_sql(value: Option<&<Sqlite as Backend>::RawValue>) -> deserialize::Result<Self> {
        match <String as FromSql<Text, Sqlite>>::from_sql(value)?.as_str() {
            "off" => Ok(VmStatus::Off),
            "on" => Ok(VmStatus::On),
            other => Err(format!("Unknown machine status {:?}", other).into()),
        }
    }
}
