// src/notify/email.rs
use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{ContactMessage, Notifier};

pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    /// `Ok(None)` when `SMTP_HOST` is unset (channel off). Any other missing
    /// or malformed variable is an error so a half-configured channel is noticed.
    pub fn from_env() -> Result<Option<Self>> {
        let Ok(host) = std::env::var("SMTP_HOST") else {
            return Ok(None);
        };
        let user = std::env::var("SMTP_USER").context("SMTP_USER missing")?;
        let pass = std::env::var("SMTP_PASS").context("SMTP_PASS missing")?;
        let from_addr = std::env::var("CONTACT_EMAIL_FROM").context("CONTACT_EMAIL_FROM missing")?;
        let to_addr = std::env::var("CONTACT_EMAIL_TO").context("CONTACT_EMAIL_TO missing")?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(creds)
            .build();

        let from = from_addr.parse().context("invalid CONTACT_EMAIL_FROM")?;
        let to = to_addr.parse().context("invalid CONTACT_EMAIL_TO")?;

        Ok(Some(Self { mailer, from, to }))
    }

    fn build(&self, msg: &ContactMessage) -> Result<Message> {
        let body = format!(
            "Name: {}\nEmail: {}\nReceived: {}\n\n{}\n",
            msg.name,
            msg.email,
            msg.received_at.to_rfc3339(),
            msg.message
        );

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(msg.subject_line())
            .header(header::ContentType::TEXT_PLAIN);
        if let Ok(reply_to) = msg.email.parse::<Mailbox>() {
            builder = builder.reply_to(reply_to);
        }
        builder.body(body).context("build email")
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, msg: &ContactMessage) -> Result<()> {
        let email = self.build(msg)?;
        self.mailer.send(email).await.context("send email")?;
        Ok(())
    }
}
