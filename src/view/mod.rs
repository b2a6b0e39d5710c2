//! Rendering to templates.
//!
//! > View is the only module that knows anything about HTML, or JSON, or other "renderings" of the
//! > response. I'm happy to call this "view" in common with traditional stateless MVC, because
//! > it's role is largely the same.
//!
//! Here, the only renderings are the emails sent to students.

use failure::{Fallible, SyncFailure};
use serde::Serialize;
use tera::{Context, Tera};

lazy_static::lazy_static! {
    static ref TERA: Fallible<Tera> = {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("invitation.txt", include_str!("templates/invitation.txt")),
        ])
        .map_err(SyncFailure::new)?;
        Ok(tera)
    };
}

/// Renders a template to a String.
pub fn render<T: Serialize>(name: &str, data: T) -> Fallible<String> {
    let tera = match *TERA {
        Ok(ref tera) => tera,
        Err(ref err) => failure::bail!("Templates failed to load: {}", err),
    };
    let context = Context::from_serialize(data).map_err(SyncFailure::new)?;
    let text = tera.render(name, &context).map_err(SyncFailure::new)?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invitation_lists_the_other_members_and_both_links() {
        let text = render(
            "invitation.txt",
            json!({
                "recipient": { "id": "a", "name": "Alice", "email": "alice@example.edu" },
                "team": { "name": "Lambdas" },
                "course": { "name": "CSCI 2041" },
                "members": [
                    { "id": "a", "name": "Alice", "email": "alice@example.edu" },
                    { "id": "b", "name": "Bob", "email": "bob@example.edu" },
                ],
                "confirm_link": "https://lab.example.edu/team/confirm/t",
                "reject_link": "https://lab.example.edu/team/reject/t",
                "expires": "Fri, 16 Oct 2026 12:00:00 +0000",
                "expires_in": "in an hour",
            }),
        )
        .unwrap();

        assert!(text.starts_with("Hi Alice,"));
        assert!(text.contains("\"Lambdas\" in CSCI 2041"));
        assert!(text.contains("- Bob <bob@example.edu>"));
        assert!(!text.contains("- Alice"));
        assert!(text.contains("https://lab.example.edu/team/confirm/t"));
        assert!(text.contains("https://lab.example.edu/team/reject/t"));
        assert!(text.contains("expires in an hour"));
    }

    #[test]
    fn unknown_templates_are_errors() {
        assert!(render("nope.txt", json!({})).is_err());
    }
}
