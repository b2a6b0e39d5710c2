use failure::Fallible;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
        SmtpTransport,
    },
    Message, Transport,
};
use std::sync::Arc;

/// A connection to the mailer.
#[allow(missing_debug_implementations)]
#[derive(Clone)]
pub struct Mailer {
    inner: Arc<MailerInner>,
}

impl Mailer {
    /// Connects to an SMTP server. With `secure`, the connection is TLS from the start; otherwise
    /// it's upgraded with STARTTLS when the server offers it.
    pub fn connect(
        host: &str,
        secure: bool,
        user: String,
        pass: String,
        from: &str,
    ) -> Fallible<Mailer> {
        let smtp = if secure {
            SmtpTransport::relay(host)?
        } else {
            SmtpTransport::builder_dangerous(host)
                .tls(Tls::Opportunistic(TlsParameters::new(host.to_string())?))
        };
        let smtp = smtp.credentials(Credentials::new(user, pass)).build();
        Ok(Mailer {
            inner: Arc::new(MailerInner {
                from: from.parse()?,
                smtp,
            }),
        })
    }

    /// Sends a plain-text email, blocking until the server accepts or refuses it.
    pub fn send(&self, to: &str, subject: &str, text: &str) -> Fallible<()> {
        let email = Message::builder()
            .from(self.inner.from.clone())
            .to(to.parse::<Mailbox>()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(text.to_string())?;
        let _ = self.inner.smtp.send(&email)?;
        Ok(())
    }
}

#[allow(missing_debug_implementations)]
struct MailerInner {
    from: Mailbox,
    smtp: SmtpTransport,
}
