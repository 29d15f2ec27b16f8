//! Process-wide configuration, loaded once at startup.
//!
//! Grounded in the teacher's own preference for global, read-only state
//! (`db::ENV`/`db::DBS` as `OnceLock`s) but for configuration specifically
//! we follow `sahays-micros`'s layering of the `config` crate over
//! `dotenvy` rather than hand-rolling `std::env::var` calls, and we pass
//! the result around as a value instead of reading a second global — per
//! spec.md §9's "render as an immutable value owned by the process root
//! and passed by reference into every subsystem that needs it."

use serde::Deserialize;

/// Immutable process configuration, per spec.md §6.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HMAC signing secret for all token flavors.
    pub secret_key: String,
    pub mail_from: String,
    /// `host` or `host:port`; §6 says default port 25 when absent.
    pub mail_smtp: String,
    pub base_url: String,
    pub admin_login: String,
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    /// If unset, the bootstrap binary mints a random password and logs it
    /// once — there is no interactive prompt in a headless deployment.
    pub admin_password: Option<String>,

    pub recaptcha_secret: Option<String>,
    #[serde(default)]
    pub enable_registration: bool,
    #[serde(default)]
    pub enable_maintenance: bool,

    /// Filesystem path for the LMDB environment. Not part of spec.md's
    /// external-interface config keys, but every process needs one.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_admin_email() -> String {
    "admin@localhost".to_string()
}

impl Config {
    /// Split `mail_smtp` into `(host, port)`, defaulting to port 25.
    pub fn mail_smtp_host_port(&self) -> (String, u16) {
        match self.mail_smtp.split_once(':') {
            Some((host, port)) => (host.to_string(), port.parse().unwrap_or(25)),
            None => (self.mail_smtp.clone(), 25),
        }
    }

    /// Load from environment (via `.env` if present) and optional config
    /// file, with environment variables taking precedence — the same
    /// precedence order `sahays-micros` uses for its services.
    pub fn load() -> crate::error::Result<Config> {
        let _ = dotenvy::dotenv();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().try_parsing(true));

        let cfg = builder
            .build()
            .map_err(|e| crate::error::CapError::storage(format!("config load: {e}")))?;

        cfg.try_deserialize()
            .map_err(|e| crate::error::CapError::storage(format!("config shape: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            secret_key: "s".into(),
            mail_from: "noreply@example.com".into(),
            mail_smtp: "smtp.example.com".into(),
            base_url: "https://example.com".into(),
            admin_login: "admin".into(),
            admin_email: "admin@example.com".into(),
            admin_password: None,
            recaptcha_secret: None,
            enable_registration: true,
            enable_maintenance: false,
            data_dir: "./data".into(),
        }
    }

    #[test]
    fn mail_smtp_defaults_port_25() {
        let c = sample();
        assert_eq!(c.mail_smtp_host_port(), ("smtp.example.com".to_string(), 25));
    }

    #[test]
    fn mail_smtp_parses_explicit_port() {
        let mut c = sample();
        c.mail_smtp = "smtp.example.com:2525".into();
        assert_eq!(c.mail_smtp_host_port(), ("smtp.example.com".to_string(), 2525));
    }
}
