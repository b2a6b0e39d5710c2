//! Telling students they've been invited to a team.

use crate::{
    dal::Mailer,
    schema::{Course, Student, Team},
    view::render,
};
use chrono::{DateTime, Utc};
use chrono_humanize::HumanTime;
use failure::Fallible;
use log::info;
use serde_derive::Serialize;
use serde_json::json;

/// What a student is being invited to.
#[derive(Clone, Debug, Serialize)]
pub struct Invitation {
    /// The proposed team.
    pub team: Team,

    /// The course the team is in.
    pub course: Course,

    /// Everyone on the team, the recipient included.
    pub members: Vec<Student>,

    /// When the invitation was issued.
    pub sent: DateTime<Utc>,

    /// When the recipient's token expires.
    pub expires: DateTime<Utc>,
}

/// Something that can deliver an invitation. Delivery happens after the proposal is committed,
/// and a failure is reported back to the proposer rather than undoing anything.
pub trait Notifier: Send + Sync {
    /// Delivers one invitation.
    fn deliver(
        &self,
        recipient: &Student,
        confirm_link: &str,
        reject_link: &str,
        invitation: &Invitation,
    ) -> Fallible<()>;
}

/// Sends invitations by email.
#[allow(missing_debug_implementations)]
pub struct MailNotifier {
    mailer: Mailer,
}

impl MailNotifier {
    /// Creates a notifier that sends through the given mailer.
    pub fn new(mailer: Mailer) -> MailNotifier {
        MailNotifier { mailer }
    }
}

impl Notifier for MailNotifier {
    fn deliver(
        &self,
        recipient: &Student,
        confirm_link: &str,
        reject_link: &str,
        invitation: &Invitation,
    ) -> Fallible<()> {
        let text = render_invitation(recipient, confirm_link, reject_link, invitation)?;
        let subject = format!(
            "[{}] You've been invited to join {}",
            invitation.course.name, invitation.team.name
        );
        self.mailer.send(&recipient.email, &subject, &text)
    }
}

/// Logs invitations instead of sending them, for when there's no mail server.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(
        &self,
        recipient: &Student,
        confirm_link: &str,
        reject_link: &str,
        invitation: &Invitation,
    ) -> Fallible<()> {
        info!(
            "Invitation for {} <{}> to join {:?}: confirm at {}, reject at {}",
            recipient.name, recipient.email, invitation.team.name, confirm_link, reject_link
        );
        Ok(())
    }
}

/// Renders the text of an invitation email.
pub fn render_invitation(
    recipient: &Student,
    confirm_link: &str,
    reject_link: &str,
    invitation: &Invitation,
) -> Fallible<String> {
    let expires_in = HumanTime::from(invitation.expires - invitation.sent).to_string();
    render(
        "invitation.txt",
        json!({
            "recipient": recipient,
            "confirm_link": confirm_link,
            "reject_link": reject_link,
            "team": invitation.team,
            "course": invitation.course,
            "members": invitation.members,
            "expires": invitation.expires.to_rfc2822(),
            "expires_in": expires_in,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Id, TeamStatus};
    use chrono::Duration;

    #[test]
    fn expiry_is_measured_from_when_the_invitation_was_sent() {
        let sent = "2001-02-03T04:05:06Z".parse::<DateTime<Utc>>().unwrap();
        let alice = Student {
            id: Id::generate(),
            name: "Alice".to_owned(),
            email: "alice@example.edu".to_owned(),
        };
        let course = Course {
            id: Id::generate(),
            name: "CSCI 4061".to_owned(),
            min_team_size: 1,
            max_team_size: 1,
            enabled: true,
        };
        let invitation = Invitation {
            team: Team {
                id: Id::generate(),
                course: course.id,
                name: "Lambdas".to_owned(),
                status: TeamStatus::Unconfirmed,
                proposed_at: sent.naive_utc(),
            },
            course,
            members: vec![alice.clone()],
            sent,
            expires: sent + Duration::hours(1),
        };

        let text = render_invitation(&alice, "confirm", "reject", &invitation).unwrap();
        assert!(text.contains("expires in an hour"), "{}", text);
    }
}
