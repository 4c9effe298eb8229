use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as Email, Tokio1Executor};
use tracing::{info, warn};

use crate::config::EmailSettings;
use crate::error::NotifyError;
use crate::model::Alert;
use crate::notifier::{Message, Notifier, format_alert, format_degraded};

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Delivers one rendered message. No retries at this level.
pub trait MailTransport: Send + Sync {
    fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), Report<NotifyError>>>;
}

/// SMTP submission over STARTTLS.
pub struct SmtpMailer {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &EmailSettings) -> Result<Self, Report<NotifyError>> {
        let from: Mailbox = settings
            .sender
            .parse()
            .change_context(NotifyError::Build)
            .attach_with(|| format!("sender: {}", settings.sender))?;
        let to: Mailbox = settings
            .recipient
            .parse()
            .change_context(NotifyError::Build)
            .attach_with(|| format!("recipient: {}", settings.recipient))?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host)
            .change_context(NotifyError::Connection)
            .attach_with(|| format!("smtp host: {}", settings.smtp_host))?
            .port(settings.smtp_port)
            .credentials(Credentials::new(
                settings.smtp_user.clone(),
                settings.smtp_pass.clone(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        Ok(Self { mailer, from, to })
    }
}

impl MailTransport for SmtpMailer {
    fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), Report<NotifyError>>> {
        Box::pin(async move {
            let email = Email::builder()
                .from(self.from.clone())
                .to(self.to.clone())
                .subject(message.subject.clone())
                .header(ContentType::TEXT_PLAIN)
                .body(message.body.clone())
                .change_context(NotifyError::Build)?;

            self.mailer
                .send(email)
                .await
                .map(|_| ())
                .map_err(classify_smtp_error)
        })
    }
}

fn classify_smtp_error(err: lettre::transport::smtp::Error) -> Report<NotifyError> {
    let context = if err.is_timeout() {
        NotifyError::Timeout
    } else if err.is_permanent() {
        // 530/534/535 are the authentication family.
        let auth = err
            .status()
            .is_some_and(|code| code.to_string().starts_with("53"));
        if auth {
            NotifyError::Auth
        } else {
            NotifyError::Rejected
        }
    } else if err.is_client() {
        NotifyError::Rejected
    } else {
        NotifyError::Connection
    };
    Report::new(err).change_context(context)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Retry,
    GiveUp,
}

/// Bounded retry for transient transport failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: RETRY_DELAY,
        }
    }

    /// Decide what follows failed attempt number `attempt` (1-based).
    pub fn step(&self, attempt: u32, error: &NotifyError) -> Step {
        if error.is_retryable() && attempt < self.max_attempts {
            Step::Retry
        } else {
            Step::GiveUp
        }
    }
}

pub struct EmailNotifier<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: MailTransport> EmailNotifier<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    async fn deliver(&self, message: Message) -> Result<(), Report<NotifyError>> {
        let mut attempt = 1;
        loop {
            let report = match self.transport.send(&message).await {
                Ok(()) => {
                    info!(subject = %message.subject, attempt, "notification sent");
                    return Ok(());
                }
                Err(report) => report,
            };

            match self.policy.step(attempt, report.current_context()) {
                Step::Retry => {
                    warn!(
                        subject = %message.subject,
                        attempt,
                        error = ?report,
                        "notification failed, retrying"
                    );
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Step::GiveUp => {
                    return Err(report.attach(format!("gave up after {attempt} attempt(s)")));
                }
            }
        }
    }
}

impl<T: MailTransport> Notifier for EmailNotifier<T> {
    fn notify_alert<'a>(
        &'a self,
        alert: &'a Alert,
    ) -> BoxFuture<'a, Result<(), Report<NotifyError>>> {
        Box::pin(self.deliver(format_alert(alert)))
    }

    fn notify_degraded(&self) -> BoxFuture<'_, Result<(), Report<NotifyError>>> {
        Box::pin(self.deliver(format_degraded()))
    }
}
