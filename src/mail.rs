//! Notification boundary: the core never sends mail itself, per spec.md's
//! Non-goal on delivery — it only renders a [`Notification`] and hands it
//! to whatever [`Notifier`] the caller plugged in.
//!
//! Grounded in `original_source/core/mail.py`: the same four notification
//! kinds (`pending`, `register`, `recover`, `rejection`), the same
//! text-template-mandatory / html-template-optional contract, and the same
//! `{name}`-style placeholder substitution — done here with a small
//! hand-rolled substitution pass instead of Python's `str.format`, since
//! there is no interpolation-at-runtime primitive in the standard library.
//! `SmtpNotifier` is the one concrete `Notifier`, built on `lettre` the way
//! the teacher's crate already depends on it for outbound mail.

use std::collections::HashMap;

use crate::error::{CapError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Pending,
    Register,
    Recover,
    Rejection,
}

impl NotificationKind {
    fn template_name(self) -> &'static str {
        match self {
            NotificationKind::Pending => "pending",
            NotificationKind::Register => "register",
            NotificationKind::Recover => "recover",
            NotificationKind::Rejection => "rejection",
        }
    }

    fn subject(self) -> &'static str {
        match self {
            NotificationKind::Pending => "Your account is pending approval",
            NotificationKind::Register => "Welcome",
            NotificationKind::Recover => "Password recovery",
            NotificationKind::Rejection => "Your registration was rejected",
        }
    }
}

/// A rendered, ready-to-send message. Construction is infallible beyond
/// template lookup; delivery is entirely the `Notifier`'s concern.
#[derive(Debug, Clone)]
pub struct Notification {
    pub subject: String,
    pub recipient_email: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

/// Looks up the mandatory text template and optional HTML template for a
/// notification kind and substitutes `{login}`, `{base_url}`, and
/// `{set_password_token}` placeholders, per spec.md §4.6.
pub struct TemplateSource {
    pub templates: HashMap<&'static str, &'static str>,
    pub html_templates: HashMap<&'static str, &'static str>,
}

impl Default for TemplateSource {
    fn default() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            "pending",
            "Hi {login},\n\nYour account has been registered and is awaiting administrator approval.\n",
        );
        templates.insert(
            "register",
            "Hi {login},\n\nYour account at {base_url} has been approved. You can now log in.\n",
        );
        templates.insert(
            "recover",
            "Hi {login},\n\nUse the link below to set a new password:\n{base_url}/reset?token={set_password_token}\n",
        );
        templates.insert(
            "rejection",
            "Hi {login},\n\nYour registration request has been rejected.\n",
        );
        TemplateSource { templates, html_templates: HashMap::new() }
    }
}

fn substitute(template: &str, params: &HashMap<&str, &str>) -> String {
    let mut out = template.to_string();
    for (key, value) in params {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Render a [`Notification`] for `kind`, filling in whatever of
/// `login` / `base_url` / `set_password_token` the chosen template uses.
pub fn render(
    source: &TemplateSource,
    kind: NotificationKind,
    recipient_email: &str,
    login: &str,
    base_url: &str,
    set_password_token: Option<&str>,
) -> Result<Notification> {
    let name = kind.template_name();
    let text_template = source
        .templates
        .get(name)
        .ok_or_else(|| CapError::storage(format!("no text template for notification kind {name}")))?;

    let mut params = HashMap::new();
    params.insert("login", login);
    params.insert("base_url", base_url);
    if let Some(token) = set_password_token {
        params.insert("set_password_token", token);
    }

    let text_body = substitute(text_template, &params);
    let html_body = source.html_templates.get(name).map(|t| substitute(t, &params));

    Ok(Notification { subject: kind.subject().to_string(), recipient_email: recipient_email.to_string(), text_body, html_body })
}

/// The core's only coupling to outbound mail: something that can accept a
/// rendered [`Notification`] and attempt delivery.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// A `Notifier` that drops every notification — useful for local
/// development and for tests that don't want mail on the critical path.
pub struct NullNotifier;
impl Notifier for NullNotifier {
    fn notify(&self, _notification: &Notification) -> Result<()> {
        Ok(())
    }
}

#[cfg(feature = "server")]
pub struct SmtpNotifier {
    transport: lettre::SmtpTransport,
    mail_from: String,
}

#[cfg(feature = "server")]
impl SmtpNotifier {
    pub fn new(smtp_host: &str, smtp_port: u16, mail_from: &str) -> Result<Self> {
        let transport = lettre::SmtpTransport::builder_dangerous(smtp_host)
            .port(smtp_port)
            .build();
        Ok(SmtpNotifier { transport, mail_from: mail_from.to_string() })
    }
}

#[cfg(feature = "server")]
impl Notifier for SmtpNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        use lettre::message::{Message, MultiPart, SinglePart};
        use lettre::Transport;

        let email = if let Some(html) = &notification.html_body {
            Message::builder()
                .from(self.mail_from.parse().map_err(|e| CapError::mail_send_failed(format!("from: {e}")))?)
                .to(notification.recipient_email.parse().map_err(|e| CapError::mail_send_failed(format!("to: {e}")))?)
                .subject(&notification.subject)
                .multipart(
                    MultiPart::alternative()
                        .singlepart(SinglePart::plain(notification.text_body.clone()))
                        .singlepart(SinglePart::html(html.clone())),
                )
                .map_err(|e| CapError::mail_send_failed(e.to_string()))?
        } else {
            Message::builder()
                .from(self.mail_from.parse().map_err(|e| CapError::mail_send_failed(format!("from: {e}")))?)
                .to(notification.recipient_email.parse().map_err(|e| CapError::mail_send_failed(format!("to: {e}")))?)
                .subject(&notification.subject)
                .body(notification.text_body.clone())
                .map_err(|e| CapError::mail_send_failed(e.to_string()))?
        };

        self.transport.send(&email).map_err(|e| CapError::mail_send_failed(e.to_string()))?;
        Ok(())
    }
}
