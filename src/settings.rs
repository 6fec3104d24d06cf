//! Settings file and environment loading.
//!
//! Settings live in a JSON file (by default `appsettings.json`) under an `Options`
//! object:
//!
//! ```json
//! {
//!   "Options": {
//!     "Host": "imap.example.com",
//!     "Port": 993,
//!     "Security": "Auto",
//!     "Username": "user@example.com",
//!     "Password": "app-password",
//!     "SearchFrom": "noreply@vpn.example.com",
//!     "SearchSubject": "Your code:",
//!     "SearchNumberOfMessages": 5,
//!     "EmailMaxValidAgeSeconds": 30,
//!     "DeleteMessages": true,
//!     "ShowConsoleSeconds": 5,
//!     "TestMode": { "Enabled": false, "ImapConnect": false, "DeleteMessages": false }
//!   }
//! }
//! ```
//!
//! Environment variables named `EMAIL_PASSCODE__<KEY>` override file values, with
//! `__` separating nested groups (`EMAIL_PASSCODE__TESTMODE__ENABLED=true`).
//!
//! `Security` is one of `Tls`, `StartTls`, `Plain` or `Auto`. `Auto` (or no value)
//! picks `STARTTLS` on port 143 and implicit TLS elsewhere.

use crate::config::{RunConfig, Security, TestMode, TimeoutConfig};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Prefix of environment variables that override settings.
pub const ENV_PREFIX: &str = "EMAIL_PASSCODE__";

/// Default settings file name.
pub const DEFAULT_SETTINGS_FILE: &str = "appsettings.json";

/// Top-level settings document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Settings {
    /// The `Options` section.
    pub options: Options,
}

/// The `Options` section of the settings file.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
#[allow(missing_docs)]
pub struct Options {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub security: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub mailbox: Option<String>,
    pub search_from: Option<String>,
    pub search_subject: Option<String>,
    pub search_number_of_messages: Option<usize>,
    pub email_max_valid_age_seconds: Option<u64>,
    pub delete_messages: bool,
    pub show_console_seconds: Option<u64>,
    pub target_process: Option<String>,
    pub verbose_errors: bool,
    pub wait_on_error: bool,
    pub test_mode: TestModeOptions,
    pub timeouts: TimeoutOptions,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("mailbox", &self.mailbox)
            .field("search_from", &self.search_from)
            .field("search_subject", &self.search_subject)
            .field("search_number_of_messages", &self.search_number_of_messages)
            .field("email_max_valid_age_seconds", &self.email_max_valid_age_seconds)
            .field("delete_messages", &self.delete_messages)
            .field("show_console_seconds", &self.show_console_seconds)
            .field("target_process", &self.target_process)
            .field("verbose_errors", &self.verbose_errors)
            .field("wait_on_error", &self.wait_on_error)
            .field("test_mode", &self.test_mode)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// The `TestMode` group.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
#[allow(missing_docs)]
pub struct TestModeOptions {
    pub enabled: bool,
    pub imap_connect: bool,
    pub delete_messages: bool,
}

/// The `Timeouts` group, in whole seconds.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
#[allow(missing_docs)]
pub struct TimeoutOptions {
    pub connect_seconds: Option<u64>,
    pub auth_seconds: Option<u64>,
    pub command_seconds: Option<u64>,
    pub logout_seconds: Option<u64>,
}

/// How the binary reports a failed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitBehavior {
    /// Print the whole error source chain instead of the top-level message.
    pub verbose_errors: bool,
    /// Wait for the operator to press Enter before exiting.
    pub wait_on_error: bool,
}

impl Settings {
    /// Loads the settings file, then `.env`, then environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut settings = Self::from_file(path)?;

        if let Ok(env_file) = dotenvy::dotenv() {
            debug!(path = %env_file.display(), "Loaded .env file");
        }

        settings.apply_env(std::env::vars())?;
        Ok(settings)
    }

    /// Reads settings from a JSON file without applying environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SettingsIo`] or [`Error::SettingsParse`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| Error::SettingsIo {
            path: path.display().to_string(),
            source,
        })?;

        serde_json::from_str(&raw).map_err(|source| Error::SettingsParse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Applies `EMAIL_PASSCODE__*` overrides from the given variables.
    ///
    /// Variables without the prefix are ignored, as are unknown keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the variable when a value does not parse.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let upper = name.to_ascii_uppercase();
            let Some(key) = upper.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            self.apply_override(&name, key, &value)?;
        }
        Ok(())
    }

    fn apply_override(&mut self, variable: &str, key: &str, value: &str) -> Result<()> {
        let options = &mut self.options;
        match key {
            "HOST" => options.host = Some(value.to_string()),
            "PORT" => options.port = Some(parse_value(variable, value)?),
            "SECURITY" => options.security = Some(value.to_string()),
            "USERNAME" => options.username = Some(value.to_string()),
            "PASSWORD" => options.password = Some(value.to_string()),
            "MAILBOX" => options.mailbox = Some(value.to_string()),
            "SEARCHFROM" => options.search_from = Some(value.to_string()),
            "SEARCHSUBJECT" => options.search_subject = Some(value.to_string()),
            "SEARCHNUMBEROFMESSAGES" => {
                options.search_number_of_messages = Some(parse_value(variable, value)?);
            }
            "EMAILMAXVALIDAGESECONDS" => {
                options.email_max_valid_age_seconds = Some(parse_value(variable, value)?);
            }
            "DELETEMESSAGES" => options.delete_messages = parse_bool(variable, value)?,
            "SHOWCONSOLESECONDS" => {
                options.show_console_seconds = Some(parse_value(variable, value)?);
            }
            "TARGETPROCESS" => options.target_process = Some(value.to_string()),
            "VERBOSEERRORS" => options.verbose_errors = parse_bool(variable, value)?,
            "WAITONERROR" => options.wait_on_error = parse_bool(variable, value)?,
            "TESTMODE__ENABLED" => options.test_mode.enabled = parse_bool(variable, value)?,
            "TESTMODE__IMAPCONNECT" => {
                options.test_mode.imap_connect = parse_bool(variable, value)?;
            }
            "TESTMODE__DELETEMESSAGES" => {
                options.test_mode.delete_messages = parse_bool(variable, value)?;
            }
            "TIMEOUTS__CONNECTSECONDS" => {
                options.timeouts.connect_seconds = Some(parse_value(variable, value)?);
            }
            "TIMEOUTS__AUTHSECONDS" => {
                options.timeouts.auth_seconds = Some(parse_value(variable, value)?);
            }
            "TIMEOUTS__COMMANDSECONDS" => {
                options.timeouts.command_seconds = Some(parse_value(variable, value)?);
            }
            "TIMEOUTS__LOGOUTSECONDS" => {
                options.timeouts.logout_seconds = Some(parse_value(variable, value)?);
            }
            _ => {
                debug!(variable, "Ignoring unknown settings override");
                return Ok(());
            }
        }

        debug!(variable, "Applied settings override");
        Ok(())
    }

    /// Turns on test mode with simulated connections.
    pub fn force_simulation(&mut self) {
        self.options.test_mode.enabled = true;
        self.options.test_mode.imap_connect = true;
    }

    /// Builds the immutable run configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if required values are missing or a value is
    /// out of range.
    pub fn to_run_config(&self) -> Result<RunConfig> {
        let options = &self.options;
        let mut builder = RunConfig::builder()
            .search_from(options.search_from.clone().unwrap_or_default())
            .search_subject(options.search_subject.clone().unwrap_or_default())
            .delete_messages(options.delete_messages)
            .test_mode(TestMode::new(
                options.test_mode.enabled,
                options.test_mode.imap_connect,
                options.test_mode.delete_messages,
            ))
            .timeouts(options.timeouts.to_timeout_config());

        if let Some(host) = &options.host {
            builder = builder.host(host);
        }
        if let Some(port) = options.port {
            builder = builder.port(port);
        }
        if let Some(security) = options.security()? {
            builder = builder.security(security);
        }
        if let Some(username) = &options.username {
            builder = builder.username(username);
        }
        if let Some(password) = &options.password {
            builder = builder.password(password);
        }
        if let Some(mailbox) = &options.mailbox {
            builder = builder.mailbox(mailbox);
        }
        if let Some(max_messages) = options.search_number_of_messages {
            builder = builder.max_messages(max_messages);
        }
        if let Some(seconds) = options.email_max_valid_age_seconds {
            builder = builder.warn_after(Duration::from_secs(seconds));
        }
        if let Some(seconds) = options.show_console_seconds {
            builder = builder.show_console(Duration::from_secs(seconds));
        }
        if let Some(process) = &options.target_process {
            builder = builder.target_process(process);
        }

        builder.build()
    }

    /// Returns how failures should be reported.
    #[must_use]
    pub fn exit_behavior(&self) -> ExitBehavior {
        ExitBehavior {
            verbose_errors: self.options.verbose_errors,
            wait_on_error: self.options.wait_on_error,
        }
    }
}

impl Options {
    /// The explicit transport security, `None` for `Auto` or no value.
    fn security(&self) -> Result<Option<Security>> {
        match self.security.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(mode) if mode.eq_ignore_ascii_case("auto") => Ok(None),
            Some(mode) => mode.parse().map(Some),
        }
    }
}

impl TimeoutOptions {
    fn to_timeout_config(self) -> TimeoutConfig {
        let defaults = TimeoutConfig::default();
        TimeoutConfig {
            connect: self
                .connect_seconds
                .map_or(defaults.connect, Duration::from_secs),
            auth: self.auth_seconds.map_or(defaults.auth, Duration::from_secs),
            command: self
                .command_seconds
                .map_or(defaults.command, Duration::from_secs),
            logout: self
                .logout_seconds
                .map_or(defaults.logout, Duration::from_secs),
        }
    }
}

fn parse_value<T: FromStr>(variable: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::InvalidConfig {
        message: format!("{variable} must be a non-negative number, got '{value}'"),
    })
}

fn parse_bool(variable: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::InvalidConfig {
            message: format!("{variable} must be true or false, got '{value}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeleteMode, SessionMode};
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "Options": {
            "Host": "imap.example.com",
            "Port": 993,
            "Username": "user@example.com",
            "Password": "file-password",
            "SearchFrom": "noreply@vpn.example.com",
            "SearchSubject": "Your code:",
            "SearchNumberOfMessages": 5,
            "EmailMaxValidAgeSeconds": 45,
            "DeleteMessages": true,
            "ShowConsoleSeconds": 2,
            "TestMode": { "Enabled": false, "ImapConnect": true, "DeleteMessages": false }
        }
    }"#;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_parse_sample_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        let config = settings.to_run_config().unwrap();

        assert_eq!(config.host, "imap.example.com");
        assert_eq!(config.password(), "file-password");
        assert_eq!(config.search.subject, "Your code:");
        assert_eq!(config.search.max_messages, 5);
        assert_eq!(config.freshness.warn_after, Duration::from_secs(45));
        assert_eq!(config.show_console, Duration::from_secs(2));
        assert!(config.delete_messages);
        // Master switch is off, so the capability flags are inert
        assert_eq!(config.test_mode.session_mode(), SessionMode::Live);
        assert_eq!(config.test_mode.delete_mode(), DeleteMode::Forward);
    }

    #[test]
    fn test_missing_file() {
        let result = Settings::from_file("/definitely/not/here/appsettings.json");
        assert!(matches!(result, Err(Error::SettingsIo { .. })));
    }

    #[test]
    fn test_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ \"Options\": ").unwrap();

        let result = Settings::from_file(file.path());
        assert!(matches!(result, Err(Error::SettingsParse { .. })));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut settings: Settings = serde_json::from_str(SAMPLE).unwrap();
        settings
            .apply_env(vars(&[
                ("EMAIL_PASSCODE__PASSWORD", "env-password"),
                ("email_passcode__TestMode__Enabled", "yes"),
                ("EMAIL_PASSCODE__TIMEOUTS__COMMANDSECONDS", "12"),
                ("UNRELATED", "ignored"),
                ("EMAIL_PASSCODE__SOMETHING_ELSE", "ignored"),
            ]))
            .unwrap();

        let config = settings.to_run_config().unwrap();
        assert_eq!(config.password(), "env-password");
        assert_eq!(config.test_mode.session_mode(), SessionMode::Simulated);
        assert_eq!(config.timeouts.command, Duration::from_secs(12));
    }

    #[test]
    fn test_malformed_override_names_variable() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(vars(&[("EMAIL_PASSCODE__PORT", "imap")]))
            .unwrap_err();
        assert!(err.to_string().contains("EMAIL_PASSCODE__PORT"));

        let err = settings
            .apply_env(vars(&[("EMAIL_PASSCODE__DELETEMESSAGES", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("EMAIL_PASSCODE__DELETEMESSAGES"));
    }

    #[test]
    fn test_force_simulation() {
        let mut settings: Settings =
            serde_json::from_str(r#"{ "Options": { "SearchSubject": "CODE" } }"#).unwrap();
        settings.force_simulation();

        let config = settings.to_run_config().unwrap();
        assert_eq!(config.test_mode.session_mode(), SessionMode::Simulated);
        assert_eq!(config.test_mode.delete_mode(), DeleteMode::Suppress);
    }

    #[test]
    fn test_exit_behavior_and_redacted_debug() {
        let settings: Settings = serde_json::from_str(
            r#"{ "Options": { "Password": "hunter2", "VerboseErrors": true } }"#,
        )
        .unwrap();

        assert_eq!(
            settings.exit_behavior(),
            ExitBehavior {
                verbose_errors: true,
                wait_on_error: false
            }
        );
        assert!(!format!("{settings:?}").contains("hunter2"));
    }

    #[test]
    fn test_security_key() {
        let settings: Settings = serde_json::from_str(
            r#"{ "Options": { "Host": "mail.example.com", "Port": 143, "Username": "u",
                 "Password": "p", "SearchSubject": "CODE" } }"#,
        )
        .unwrap();
        assert_eq!(settings.to_run_config().unwrap().security, Security::StartTls);

        let mut plain = settings.clone();
        plain.options.security = Some("Plain".into());
        assert_eq!(plain.to_run_config().unwrap().security, Security::Plain);

        let mut auto = settings.clone();
        auto.apply_env(vars(&[("EMAIL_PASSCODE__SECURITY", "auto")]))
            .unwrap();
        assert_eq!(auto.to_run_config().unwrap().security, Security::StartTls);

        let mut tls = settings.clone();
        tls.apply_env(vars(&[("EMAIL_PASSCODE__SECURITY", "Tls")]))
            .unwrap();
        assert_eq!(tls.to_run_config().unwrap().security, Security::Tls);

        let mut unknown = settings;
        unknown.options.security = Some("quantum".into());
        assert!(matches!(
            unknown.to_run_config(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_zero_timeout_in_file_is_rejected() {
        let settings: Settings = serde_json::from_str(
            r#"{ "Options": { "SearchSubject": "CODE",
                 "TestMode": { "Enabled": true, "ImapConnect": true },
                 "Timeouts": { "ConnectSeconds": 0 } } }"#,
        )
        .unwrap();

        let err = settings.to_run_config().unwrap_err();
        assert!(err.to_string().contains("connect timeout"));
    }
}
