use envconfig::Envconfig;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,\
http://localhost:5173,\
https://hack-the-bias.vercel.app,\
https://hack-the-bias-git-development-hack-the-bias-projects.vercel.app,\
https://www.hackthebias.dev";

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "0.0.0.0:8000")]
    pub bind_addr: SocketAddr,

    /// Backend project URL
    #[envconfig(from = "SUPABASE_URL")]
    pub supabase_url: String,

    /// Public (anon) key used for user-scoped calls
    #[envconfig(from = "SUPABASE_KEY")]
    pub supabase_key: String,

    /// Service-role key used for admin calls, falls back to the anon key
    #[envconfig(from = "SUPABASE_SERVICE_ROLE_KEY")]
    pub supabase_service_role_key: Option<String>,

    /// Comma separated list of admin email addresses
    #[envconfig(from = "ADMIN_EMAILS")]
    pub admin_emails: Option<String>,

    /// Mail provider API token
    #[envconfig(from = "MAILTRAP_PASS")]
    pub mailtrap_token: Option<String>,

    /// Template used for pre-registration and welcome emails
    #[envconfig(from = "MAILTRAP_TEMPLATE_UUID")]
    pub mailtrap_template_uuid: Option<String>,

    /// Template used once a full registration completes
    #[envconfig(from = "MAILTRAP_COMPLETE_REG_TEMPLATE_UUID")]
    pub mailtrap_complete_template_uuid: Option<String>,

    #[envconfig(from = "MAIL_FROM", default = "info@hackthebias.dev")]
    pub mail_from: String,

    #[envconfig(from = "MAIL_DOMAIN", default = "hackthebias.dev")]
    pub mail_domain: String,

    #[envconfig(from = "UNSUBSCRIBE_BASE", default = "https://hackthebias.dev/unsubscribe")]
    pub unsubscribe_base: String,

    /// CAPTCHA secret; verification is skipped when unset
    #[envconfig(from = "RECAPTCHA_SECRET")]
    pub recaptcha_secret: Option<String>,

    /// Comma separated list of allowed browser origins
    #[envconfig(from = "CORS_ORIGINS", default = "")]
    pub cors_origins: String,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Timeout applied to every backend call, in seconds
    #[envconfig(from = "UPSTREAM_TIMEOUT_SECS", default = "10")]
    pub upstream_timeout_secs: u64,

    /// Interval between sweeps of idle rate limit windows, in seconds
    #[envconfig(from = "RATE_LIMIT_SWEEP_INTERVAL_SECS", default = "60")]
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Key used for privileged backend calls
    pub fn service_key(&self) -> &str {
        self.supabase_service_role_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .unwrap_or(&self.supabase_key)
    }

    /// Normalized admin allow-list. Empty means nobody is admin by email.
    pub fn admin_email_set(&self) -> HashSet<String> {
        self.admin_emails
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|email| email.trim().to_lowercase())
            .filter(|email| !email.is_empty())
            .collect()
    }

    pub fn cors_origin_list(&self) -> Vec<String> {
        let raw = if self.cors_origins.trim().is_empty() {
            DEFAULT_CORS_ORIGINS
        } else {
            self.cors_origins.as_str()
        };
        raw.split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect()
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn captcha_enabled(&self) -> bool {
        self.recaptcha_secret
            .as_deref()
            .is_some_and(|secret| !secret.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, envconfig::Error> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::init_from_hashmap(&map)
    }

    #[test]
    fn test_missing_backend_url_is_fatal() {
        assert!(config_from(&[("SUPABASE_KEY", "anon")]).is_err());
    }

    #[test]
    fn test_defaults_applied() {
        let config = config_from(&[
            ("SUPABASE_URL", "https://project.supabase.co"),
            ("SUPABASE_KEY", "anon"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.service_key(), "anon");
        assert!(config.admin_email_set().is_empty());
        assert!(!config.captcha_enabled());
        assert_eq!(config.upstream_timeout(), Duration::from_secs(10));
        assert!(config
            .cors_origin_list()
            .contains(&"https://www.hackthebias.dev".to_string()));
    }

    #[test]
    fn test_admin_emails_are_normalized() {
        let config = config_from(&[
            ("SUPABASE_URL", "https://project.supabase.co"),
            ("SUPABASE_KEY", "anon"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service"),
            ("ADMIN_EMAILS", " Lead@Example.com, ,ops@example.com "),
        ])
        .unwrap();

        let admins = config.admin_email_set();
        assert_eq!(admins.len(), 2);
        assert!(admins.contains("lead@example.com"));
        assert_eq!(config.service_key(), "service");
    }
}
