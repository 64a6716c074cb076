use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::Notification;
use crate::config::SmtpConfig;

/// Outbound SMTP for notifications. One message per recipient so addresses
/// are never disclosed to each other.
pub struct SystemMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SystemMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, String> {
        let sender: Mailbox = config
            .from
            .parse()
            .map_err(|e| format!("Invalid sender address {:?}: {e}", config.from))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| format!("SMTP relay {}: {e}", config.host))?
            .port(config.port)
            .credentials(Credentials::new(config.user.clone(), config.pass.clone()))
            .build();

        Ok(Self { transport, sender })
    }

    pub async fn deliver(&self, to: &str, notification: &Notification) -> Result<(), String> {
        let recipient: Mailbox = to
            .parse()
            .map_err(|e| format!("Invalid recipient {to:?}: {e}"))?;

        let message = Message::builder()
            .from(self.sender.clone())
            .to(recipient)
            .subject(notification.subject.as_str())
            .multipart(MultiPart::alternative_plain_html(
                notification.body.text.clone(),
                notification.body.html.clone(),
            ))
            .map_err(|e| format!("Failed to build message: {e}"))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| format!("SMTP send to {to}: {e}"))?;
        Ok(())
    }
}
