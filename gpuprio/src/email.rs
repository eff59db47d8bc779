//! Email service for priority request notifications.

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::path::Path;

use crate::notifications::NotificationEvent;
use crate::{config::Config, errors::Error};

pub struct EmailService {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
    reply_to: Option<String>,
    base_url: String,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            crate::config::EmailTransportConfig::Smtp {
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
            crate::config::EmailTransportConfig::File { path } => {
                // Use file transport for development/testing
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
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
            reply_to: email_config.reply_to.clone(),
            base_url: config.dashboard_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn send_notification(&self, event: &NotificationEvent) -> Result<(), Error> {
        let (subject, body) = self.render(event);
        self.send_email(event.recipient(), &subject, &body).await
    }

    async fn send_email(&self, to_email: &str, subject: &str, body: &str) -> Result<(), Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        let to = to_email.parse::<Mailbox>().map_err(|e| Error::Internal {
            operation: format!("parse to email: {e}"),
        })?;

        let mut builder = Message::builder().from(from).to(to).subject(subject).header(ContentType::TEXT_HTML);

        if let Some(reply_to) = &self.reply_to {
            let reply_to = reply_to.parse::<Mailbox>().map_err(|e| Error::Internal {
                operation: format!("parse reply-to email: {e}"),
            })?;
            builder = builder.reply_to(reply_to);
        }

        let message = builder.body(body.to_string()).map_err(|e| Error::Internal {
            operation: format!("build email message: {e}"),
        })?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        Ok(())
    }

    /// Subject line and HTML body for an event.
    fn render(&self, event: &NotificationEvent) -> (String, String) {
        let link = format!("{}/priorities/{}", self.base_url, event.request_id());

        match event {
            NotificationEvent::Created {
                requester,
                bugzilla_ticket,
                gpu_type,
                gpu_count,
                duration_days,
                slurm_project,
                reason,
                ..
            } => {
                let subject = format!("New GPU priority request for ticket {bugzilla_ticket}");
                let mut content = format!(
                    r#"<p>A new GPU priority request has been submitted.</p>
        <table>
            <tr><td>Requester</td><td>{}</td></tr>
            <tr><td>Bugzilla ticket</td><td>{}</td></tr>
            <tr><td>GPUs</td><td>{} &times; {}</td></tr>
            <tr><td>Duration</td><td>{} days</td></tr>
            <tr><td>SLURM project</td><td>{}</td></tr>
        </table>"#,
                    escape(requester),
                    escape(bugzilla_ticket),
                    gpu_count,
                    escape(gpu_type),
                    duration_days,
                    escape(slurm_project),
                );
                if !reason.is_empty() {
                    content.push_str(&format!("\n        <p>Reason: {}</p>", escape(reason)));
                }
                (subject, self.wrap("New GPU priority request", &content, &link))
            }
            NotificationEvent::Accepted {
                priority_name,
                valid_until,
                message,
                ..
            } => {
                let subject = format!("GPU priority accepted: {priority_name}");
                let mut content = format!(
                    "<p>Your GPU priority request has been accepted as <strong>{}</strong>.</p>\n        <p>It is valid until {} UTC.</p>",
                    escape(priority_name),
                    valid_until.format("%Y-%m-%d %H:%M"),
                );
                if let Some(message) = message {
                    content.push_str(&format!("\n        <p>Message from the administrators: {}</p>", escape(message)));
                }
                (subject, self.wrap("GPU priority accepted", &content, &link))
            }
            NotificationEvent::Refused { reason, .. } => {
                let subject = "GPU priority request refused".to_string();
                let mut content = "<p>Your GPU priority request has been refused.</p>".to_string();
                if !reason.is_empty() {
                    content.push_str(&format!("\n        <p>Reason: {}</p>", escape(reason)));
                }
                (subject, self.wrap("GPU priority request refused", &content, &link))
            }
            NotificationEvent::MessageAdded { author, text, .. } => {
                let subject = "New message on your GPU priority request".to_string();
                let content = format!("<p>{} wrote:</p>\n        <blockquote>{}</blockquote>", escape(author), escape(text));
                (subject, self.wrap("New message", &content, &link))
            }
        }
    }

    fn wrap(&self, title: &str, content: &str, link: &str) -> String {
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

        <p><a href="{link}">View the request</a></p>

        <div class="footer">
            <p>This is an automated message, please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>"#
        )
    }
}

/// Minimal HTML escaping for user-supplied text
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_config;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_email_service_creation() {
        let config = create_test_config();
        let email_service = EmailService::new(&config);
        assert!(email_service.is_ok());
    }

    #[tokio::test]
    async fn test_created_body() {
        let config = create_test_config();
        let email_service = EmailService::new(&config).unwrap();
        let id = uuid::Uuid::new_v4();

        let (subject, body) = email_service.render(&NotificationEvent::Created {
            request_id: id,
            recipient: "admin@example.com".to_string(),
            requester: "req".to_string(),
            bugzilla_ticket: "12345".to_string(),
            gpu_type: "v100".to_string(),
            gpu_count: 2,
            duration_days: 7,
            slurm_project: "proj_a".to_string(),
            reason: "<deadline>".to_string(),
        });

        assert_eq!(subject, "New GPU priority request for ticket 12345");
        assert!(body.contains("2 &times; v100"));
        assert!(body.contains("7 days"));
        assert!(body.contains("&lt;deadline&gt;"));
        assert!(body.contains(&format!("/priorities/{id}")));
    }

    #[tokio::test]
    async fn test_accepted_body() {
        let config = create_test_config();
        let email_service = EmailService::new(&config).unwrap();

        let (subject, body) = email_service.render(&NotificationEvent::Accepted {
            request_id: uuid::Uuid::new_v4(),
            recipient: "req@example.com".to_string(),
            priority_name: "proj_a_prio".to_string(),
            valid_until: Utc.with_ymd_and_hms(2025, 3, 17, 14, 30, 0).unwrap(),
            message: None,
        });

        assert_eq!(subject, "GPU priority accepted: proj_a_prio");
        assert!(body.contains("<strong>proj_a_prio</strong>"));
        assert!(body.contains("2025-03-17 14:30 UTC"));
        assert!(!body.contains("Message from the administrators"));
    }

    #[tokio::test]
    async fn test_refused_body_without_reason() {
        let config = create_test_config();
        let email_service = EmailService::new(&config).unwrap();

        let (_, body) = email_service.render(&NotificationEvent::Refused {
            request_id: uuid::Uuid::new_v4(),
            recipient: "req@example.com".to_string(),
            reason: String::new(),
        });

        assert!(body.contains("has been refused"));
        assert!(!body.contains("Reason:"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&#39;");
    }
}
