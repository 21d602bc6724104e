//! Outbound mail for password-reset links.
//!
//! Delivery is fire-and-forget from the session manager's point of view:
//! failures are logged by the caller and never change the HTTP outcome.

use crate::config::EmailConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use lettre::message::{Mailbox, MultiPart, SinglePart, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::str::FromStr;

/// Email collaborator consumed by the session manager.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Delivers `link` to `to`. The link embeds a live reset token that
    /// stops working after `expires_in`.
    async fn send_password_reset(&self, to: &str, link: &str, expires_in: Duration) -> Result<()>;
}

pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    config: EmailConfig,
}

impl EmailService {
    /// Creates a new EmailService instance
    pub fn new(config: EmailConfig) -> Result<Self> {
        let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .with_context(|| format!("Invalid SMTP host: {}", config.smtp_host))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        Ok(Self { mailer, config })
    }

    /// Sends a multipart text/html email
    pub async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_content: &str,
        text_content: &str,
    ) -> Result<()> {
        let from_mailbox = Mailbox::from_str(&format!(
            "{} <{}>",
            self.config.from_name, self.config.from_email
        ))
        .context("Invalid from email")?;

        let to_mailbox = Mailbox::from_str(to_email).context("Invalid recipient email")?;

        let email = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_content.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_content.to_string()),
                    ),
            )
            .context("Failed to build email")?;

        self.mailer
            .send(email)
            .await
            .context("Failed to send email")?;

        Ok(())
    }
}

fn describe_ttl(ttl: Duration) -> String {
    let minutes = ttl.num_minutes().max(1);
    let (amount, unit) = if minutes % (24 * 60) == 0 {
        (minutes / (24 * 60), "day")
    } else if minutes % 60 == 0 {
        (minutes / 60, "hour")
    } else {
        (minutes, "minute")
    };
    if amount == 1 {
        format!("1 {unit}")
    } else {
        format!("{amount} {unit}s")
    }
}

fn build_reset_html(reset_url: &str, expiry: &str) -> String {
    format!(
        r#"
        <!DOCTYPE html>
        <html>
        <head>
            <meta charset="UTF-8">
            <title>Reset your password</title>
        </head>
        <body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
            <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
                <h2 style="color: #2c3e50;">Password reset requested</h2>

                <p>Click the button below to choose a new password:</p>

                <div style="text-align: center; margin: 30px 0;">
                    <a href="{reset_url}"
                       style="background-color: #3498db; color: white; padding: 12px 30px;
                              text-decoration: none; border-radius: 5px; display: inline-block;">
                        Reset Password
                    </a>
                </div>

                <p>Or copy and paste this link into your browser:</p>
                <p style="word-break: break-all; color: #7f8c8d;">{reset_url}</p>

                <hr style="border: none; border-top: 1px solid #ecf0f1; margin: 30px 0;">

                <p style="font-size: 12px; color: #7f8c8d;">
                    This link expires in {expiry} and can be used once. If you did not
                    request a reset, you can safely ignore this email.
                </p>
            </div>
        </body>
        </html>
        "#
    )
}

fn build_reset_text(reset_url: &str, expiry: &str) -> String {
    format!(
        r#"Password reset requested

Open the link below to choose a new password:
{reset_url}

This link expires in {expiry} and can be used once. If you did not request a reset, you can safely ignore this email.
"#
    )
}

#[async_trait]
impl EmailSender for EmailService {
    async fn send_password_reset(&self, to: &str, link: &str, expires_in: Duration) -> Result<()> {
        let expiry = describe_ttl(expires_in);
        self.send_email(
            to,
            "Reset your password",
            &build_reset_html(link, &expiry),
            &build_reset_text(link, &expiry),
        )
        .await
    }
}

/// Development sender used when SMTP is not configured. Only the recipient is
/// logged; the link carries a live token and never reaches the log.
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_password_reset(&self, to: &str, _link: &str, _expires_in: Duration) -> Result<()> {
        tracing::warn!(recipient = %to, "SMTP not configured; password reset email dropped");
        Ok(())
    }
}
