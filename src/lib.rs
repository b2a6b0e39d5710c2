//! courselab
//! =========
//!
//! Course logistics: students form teams that only become binding once every member agrees, and
//! each confirmed team gets a quota of virtual machines it can create and run.
//!
//! Hacking
//! -------
//!
//! This follows the approach laid out in
//! ["Stateless MVC"](https://www.tedinski.com/2018/09/11/stateless-mvc.html). `dal` is the only
//! module that does IO, `logic` holds the rules (`logic::team` for team formation, `logic::vm`
//! for quotas), `schema` holds the plain data types, and `view` renders emails.
#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    // unused_qualifications,
    unused_results,
    while_true
)]

#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;

pub mod dal;
pub mod error;
pub mod logic;
pub mod schema;
pub mod util;
pub mod view;
