//! Email service for transactional mail sent by the edge functions.

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    config::{EmailConfig, EmailTransportConfig},
    errors::Error,
};

pub struct EmailService {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
    reply_to: Option<String>,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

/// A message ready to send. At least one of `html` and `text` must be set.
#[derive(Debug, Clone, Default)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    /// `Message-ID` header value, used to match delivery webhooks to the log entry
    pub message_id: String,
}

/// Built-in messages the site sends.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "id", rename_all = "snake_case")]
pub enum EmailTemplate {
    /// Sent when a visitor leaves their details on a course page
    LeadConfirmation { name: String, course: String },
    /// Sent after a student's first sign-in
    Welcome { name: String },
}

pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl EmailService {
    pub fn new(config: &EmailConfig) -> Result<Self, Error> {
        let transport = match &config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        Ok(Self {
            transport,
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
            reply_to: config.reply_to.clone(),
        })
    }

    /// Send `email` and return the message ID it was sent under.
    ///
    /// Address problems are the caller's fault (`BadRequest`); transport failures are
    /// `BadGateway`.
    #[instrument(skip(self, email), fields(recipients = email.to.len(), subject = %email.subject), err)]
    pub async fn send(&self, email: &OutgoingEmail) -> Result<SentEmail, Error> {
        let message_id = self.message_id();
        let message = self.build_message(email, &message_id)?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::BadGateway {
                    message: format!("SMTP delivery failed: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::BadGateway {
                    message: format!("file delivery failed: {e}"),
                })?;
            }
        }

        debug!(message_id, "Email handed to transport");
        Ok(SentEmail { message_id })
    }

    fn message_id(&self) -> String {
        let domain = self.from_email.rsplit_once('@').map(|(_, d)| d).unwrap_or("localhost");
        format!("<{}@{}>", Uuid::new_v4(), domain)
    }

    fn build_message(&self, email: &OutgoingEmail, message_id: &str) -> Result<Message, Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        let mut builder = Message::builder()
            .from(from)
            .subject(email.subject.clone())
            .message_id(Some(message_id.to_string()));

        for recipient in &email.to {
            builder = builder.to(parse_mailbox(recipient)?);
        }

        if let Some(reply_to) = email.reply_to.as_ref().or(self.reply_to.as_ref()) {
            builder = builder.reply_to(parse_mailbox(reply_to)?);
        }

        let message = match (&email.html, &email.text) {
            (Some(html), Some(text)) => builder.multipart(MultiPart::alternative_plain_html(text.clone(), html.clone())),
            (Some(html), None) => builder.singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(html.clone())),
            (None, Some(text)) => builder.singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(text.clone())),
            (None, None) => {
                return Err(Error::BadRequest {
                    message: "email needs an html or text body".to_string(),
                });
            }
        };

        message.map_err(|e| Error::Internal {
            operation: format!("build email message: {e}"),
        })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, Error> {
    address.parse::<Mailbox>().map_err(|e| Error::BadRequest {
        message: format!("invalid email address '{address}': {e}"),
    })
}

/// Check an address without sending anything.
pub fn validate_address(address: &str) -> Result<(), Error> {
    parse_mailbox(address).map(|_| ())
}

impl EmailTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LeadConfirmation { .. } => "lead_confirmation",
            Self::Welcome { .. } => "welcome",
        }
    }

    pub fn render(&self, site_url: &str) -> RenderedEmail {
        match self {
            Self::LeadConfirmation { name, course } => {
                let (html_name, html_course) = (escape_html(name), escape_html(course));
                RenderedEmail {
                    subject: format!("We received your request about {course}"),
                    html: layout(
                        "Thanks for your interest",
                        &format!(
                            r#"<p>Hello {html_name},</p>
        <p>Thanks for your interest in <strong>{html_course}</strong>. A member of our team will contact you shortly to find a convenient time for a trial lesson.</p>
        <p>In the meantime you can browse all courses at <a href="{site_url}">{site_url}</a>.</p>"#
                        ),
                    ),
                    text: format!(
                        "Hello {name},\n\nThanks for your interest in {course}. A member of our team will contact you shortly \
                         to find a convenient time for a trial lesson.\n\nAll courses: {site_url}\n"
                    ),
                }
            }
            Self::Welcome { name } => {
                let html_name = escape_html(name);
                RenderedEmail {
                    subject: "Welcome to the school".to_string(),
                    html: layout(
                        "Welcome",
                        &format!(
                            r#"<p>Hello {html_name},</p>
        <p>Your account is ready. Sign in any time to see your courses and lessons:</p>
        <p><a href="{site_url}">{site_url}</a></p>"#
                        ),
                    ),
                    text: format!("Hello {name},\n\nYour account is ready. Sign in any time to see your courses and lessons:\n{site_url}\n"),
                }
            }
        }
    }
}

fn layout(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>{title}</h2>

        {content}

        <div class="footer">
            <p>This is an automated message, please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>"#
    )
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmailConfig;

    fn file_config(dir: &Path) -> EmailConfig {
        EmailConfig {
            transport: EmailTransportConfig::File {
                path: dir.to_string_lossy().to_string(),
            },
            from_email: "hello@school.example".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_writes_message_with_id() {
        let dir = tempfile::tempdir().unwrap();
        let service = EmailService::new(&file_config(dir.path())).unwrap();

        let sent = service
            .send(&OutgoingEmail {
                to: vec!["student@example.com".to_string(), "Parent <parent@example.com>".to_string()],
                subject: "Timetable".to_string(),
                html: Some("<p>Mondays at 5pm</p>".to_string()),
                text: Some("Mondays at 5pm".to_string()),
                reply_to: Some("teacher@school.example".to_string()),
            })
            .await
            .unwrap();

        assert!(sent.message_id.starts_with('<'));
        assert!(sent.message_id.ends_with("@school.example>"));

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let contents = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        assert!(contents.contains("parent@example.com"));
        assert!(contents.contains("multipart/alternative"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let service = EmailService::new(&file_config(dir.path())).unwrap();

        let err = service
            .send(&OutgoingEmail {
                to: vec!["not an address".to_string()],
                subject: "Hi".to_string(),
                text: Some("Hi".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[tokio::test]
    async fn test_missing_body_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let service = EmailService::new(&file_config(dir.path())).unwrap();

        let err = service
            .send(&OutgoingEmail {
                to: vec!["student@example.com".to_string()],
                subject: "Hi".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[test]
    fn test_lead_confirmation_escapes_html_only() {
        let rendered = EmailTemplate::LeadConfirmation {
            name: "<Sam>".to_string(),
            course: "Python & Games".to_string(),
        }
        .render("https://school.example");

        assert!(rendered.html.contains("Hello &lt;Sam&gt;,"));
        assert!(rendered.html.contains("Python &amp; Games"));
        assert_eq!(rendered.subject, "We received your request about Python & Games");
        assert!(rendered.text.starts_with("Hello <Sam>,"));
        assert!(rendered.text.contains("https://school.example"));
    }

    #[test]
    fn test_template_deserializes_by_id() {
        let lead: EmailTemplate =
            serde_json::from_value(serde_json::json!({ "id": "lead_confirmation", "name": "Sam", "course": "Scratch" })).unwrap();
        assert_eq!(
            lead,
            EmailTemplate::LeadConfirmation {
                name: "Sam".to_string(),
                course: "Scratch".to_string()
            }
        );
        assert_eq!(lead.name(), "lead_confirmation");

        assert!(serde_json::from_value::<EmailTemplate>(serde_json::json!({ "id": "newsletter" })).is_err());
    }
}
