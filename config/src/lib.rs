//! Configuration for Prism.
//!
//! Settings come from `~/.prism/config.toml` and the environment. Environment
//! variables win over the file, and anything missing or invalid resolves to a
//! built-in default, so [`Settings::resolve`] never fails.
//!
//! ```toml
//! [ollama]
//! url = "http://localhost:11434"
//! model = "llama3.1:8b"
//! timeout_ms = 180000
//!
//! [email]
//! service = "gmail"
//! user = "bot@example.com"
//! pass = "${PRISM_MAIL_PASSWORD}"
//!
//! [analysis]
//! delay_secs = 60
//!
//! [registration]
//! ttl_secs = 600
//! max_attempts = 5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

use prism_inference::{DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL, DEFAULT_TIMEOUT, InferenceConfig};
use prism_registration::{DEFAULT_MAX_ATTEMPTS, DEFAULT_TTL, MailCredentials, RegistrationPolicy};
use prism_scheduler::DEFAULT_DELAY;

pub const ENV_OLLAMA_URL: &str = "OLLAMA_URL";
pub const ENV_OLLAMA_MODEL: &str = "OLLAMA_MODEL";
pub const ENV_OLLAMA_TIMEOUT: &str = "OLLAMA_TIMEOUT";
pub const ENV_EMAIL_SERVICE: &str = "EMAIL_SERVICE";
pub const ENV_EMAIL_USER: &str = "EMAIL_USER";
pub const ENV_EMAIL_PASS: &str = "EMAIL_PASS";

/// Mail provider assumed when credentials are given without a service.
pub const DEFAULT_EMAIL_SERVICE: &str = "gmail";

/// Longest accepted analysis delay or registration TTL.
pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Default, Deserialize)]
pub struct PrismConfig {
    pub ollama: Option<OllamaConfig>,
    pub email: Option<EmailConfig>,
    pub analysis: Option<AnalysisConfig>,
    pub registration: Option<RegistrationConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OllamaConfig {
    pub url: Option<String>,
    pub model: Option<String>,
    /// Per-request bound in milliseconds.
    pub timeout_ms: Option<u64>,
}

#[derive(Default, Deserialize)]
pub struct EmailConfig {
    pub service: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
}

// Manual Debug impl to prevent leaking the password in logs.
impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("service", &self.service)
            .field("user", &self.user)
            .field(
                "pass",
                &if self.pass.is_some() { "[REDACTED]" } else { "None" },
            )
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalysisConfig {
    /// Seconds between a PR opening and its automatic analysis.
    pub delay_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegistrationConfig {
    pub ttl_secs: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl PrismConfig {
    /// Load `~/.prism/config.toml`. A missing file is `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".prism").join("config.toml"))
}

/// Replace `${VAR}` references with the variable's value (empty if unset).
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    expand_with(value, &|key| env::var(key).ok())
}

fn expand_with(value: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&lookup(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unclosed reference is kept literally.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// Fully resolved, typed settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub inference: InferenceConfig,
    pub registration: RegistrationPolicy,
    /// `None` when no usable mail credentials are configured.
    pub mail: Option<MailCredentials>,
    pub analysis_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            inference: InferenceConfig::default(),
            registration: RegistrationPolicy::default(),
            mail: None,
            analysis_delay: DEFAULT_DELAY,
        }
    }
}

impl Settings {
    /// Resolve against the process environment.
    #[must_use]
    pub fn resolve(config: Option<&PrismConfig>) -> Self {
        Self::resolve_from(config, |key| env::var(key).ok())
    }

    /// Resolve with an explicit variable lookup.
    #[must_use]
    pub fn resolve_from(
        config: Option<&PrismConfig>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let source = Source { lookup: &lookup };
        let ollama = config.and_then(|c| c.ollama.as_ref());
        let email = config.and_then(|c| c.email.as_ref());
        let analysis = config.and_then(|c| c.analysis.as_ref());
        let registration = config.and_then(|c| c.registration.as_ref());

        let inference = InferenceConfig {
            base_url: source
                .string(ENV_OLLAMA_URL, ollama.and_then(|o| o.url.as_deref()))
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            model: source
                .string(ENV_OLLAMA_MODEL, ollama.and_then(|o| o.model.as_deref()))
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            timeout: source.timeout(ollama.and_then(|o| o.timeout_ms)),
        };

        let mail = source.mail(email);

        let analysis_delay = match analysis.and_then(|a| a.delay_secs) {
            Some(secs) if secs > MAX_DURATION_SECS => {
                tracing::warn!(
                    delay_secs = secs,
                    "Analysis delay exceeds {MAX_DURATION_SECS}s; using default"
                );
                DEFAULT_DELAY
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_DELAY,
        };

        Self {
            inference,
            registration: resolve_policy(registration),
            mail,
            analysis_delay,
        }
    }
}

struct Source<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Source<'_> {
    fn env(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    /// Environment first, then the file value after `${VAR}` expansion.
    fn string(&self, key: &str, file: Option<&str>) -> Option<String> {
        self.env(key)
            .or_else(|| file.map(|value| expand_with(value, self.lookup)))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn timeout(&self, file_ms: Option<u64>) -> Duration {
        let env_ms = self
            .env(ENV_OLLAMA_TIMEOUT)
            .and_then(|raw| match raw.trim().parse::<u64>() {
                Ok(ms) => Some(ms),
                Err(_) => {
                    tracing::warn!(value = %raw, "Ignoring invalid {ENV_OLLAMA_TIMEOUT}");
                    None
                }
            });
        match env_ms.or(file_ms) {
            Some(0) => {
                tracing::warn!("Ollama timeout must be positive; using default");
                DEFAULT_TIMEOUT
            }
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_TIMEOUT,
        }
    }

    fn mail(&self, file: Option<&EmailConfig>) -> Option<MailCredentials> {
        let service = self.string(ENV_EMAIL_SERVICE, file.and_then(|e| e.service.as_deref()));
        let user = self.string(ENV_EMAIL_USER, file.and_then(|e| e.user.as_deref()));
        let pass = self.string(ENV_EMAIL_PASS, file.and_then(|e| e.pass.as_deref()));

        match (user, pass) {
            (Some(user), Some(pass)) => Some(MailCredentials {
                service: service.unwrap_or_else(|| DEFAULT_EMAIL_SERVICE.to_string()),
                user,
                pass,
            }),
            (None, None) => None,
            (user, _) => {
                tracing::warn!(
                    user_set = user.is_some(),
                    "Incomplete mail credentials; codes will only be logged"
                );
                None
            }
        }
    }
}

fn resolve_policy(file: Option<&RegistrationConfig>) -> RegistrationPolicy {
    let ttl = match file.and_then(|r| r.ttl_secs) {
        Some(0) => {
            tracing::warn!("Registration TTL must be positive; using default");
            DEFAULT_TTL
        }
        Some(secs) if secs > MAX_DURATION_SECS => {
            tracing::warn!(
                ttl_secs = secs,
                "Registration TTL exceeds {MAX_DURATION_SECS}s; using default"
            );
            DEFAULT_TTL
        }
        Some(secs) => Duration::from_secs(secs),
        None => DEFAULT_TTL,
    };
    let max_attempts = match file.and_then(|r| r.max_attempts) {
        Some(0) => {
            tracing::warn!("Registration max_attempts must be positive; using default");
            DEFAULT_MAX_ATTEMPTS
        }
        Some(attempts) => attempts,
        None => DEFAULT_MAX_ATTEMPTS,
    };

    RegistrationPolicy::new(ttl, max_attempts).unwrap_or_else(|err| {
        tracing::warn!(%err, "Invalid registration policy; using default");
        RegistrationPolicy::default()
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn no_env() -> impl Fn(&str) -> Option<String> {
        env_of(&[])
    }

    fn parse(toml_text: &str) -> PrismConfig {
        toml::from_str(toml_text).unwrap()
    }

    // expand_env_vars tests

    #[test]
    fn expand_no_vars() {
        assert_eq!(expand_with("hello world", &no_env()), "hello world");
    }

    #[test]
    fn expand_single_and_adjacent_vars() {
        let env = env_of(&[("A", "alpha"), ("B", "beta")]);
        assert_eq!(expand_with("x ${A} y", &env), "x alpha y");
        assert_eq!(expand_with("${A}${B}", &env), "alphabeta");
        assert_eq!(expand_with("${A}-${B}", &env), "alpha-beta");
    }

    #[test]
    fn expand_missing_var_becomes_empty() {
        assert_eq!(expand_with("before ${MISSING} after", &no_env()), "before  after");
    }

    #[test]
    fn expand_unclosed_brace_preserved() {
        assert_eq!(expand_with("test ${UNCLOSED", &no_env()), "test ${UNCLOSED");
    }

    #[test]
    fn expand_empty_var_name_dropped() {
        assert_eq!(expand_with("test ${} more", &no_env()), "test  more");
    }

    #[test]
    fn expand_unicode_content() {
        let env = env_of(&[("CRAB", "🦀")]);
        assert_eq!(expand_with("héllo ${CRAB} wörld", &env), "héllo 🦀 wörld");
    }

    // resolution tests

    #[test]
    fn defaults_without_file_or_env() {
        let settings = Settings::resolve_from(None, no_env());
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.inference.base_url, "http://localhost:11434");
        assert_eq!(settings.inference.model, "llama3.1:8b");
        assert_eq!(settings.inference.timeout, Duration::from_millis(180_000));
        assert_eq!(settings.analysis_delay, Duration::from_secs(60));
        assert_eq!(settings.registration.max_attempts(), 5);
        assert!(settings.mail.is_none());
    }

    #[test]
    fn file_values_are_used() {
        let config = parse(
            r#"
            [ollama]
            url = "http://gpu-box:11434/"
            model = "qwen2.5-coder:7b"
            timeout_ms = 30000

            [analysis]
            delay_secs = 120

            [registration]
            ttl_secs = 300
            max_attempts = 3
            "#,
        );
        let settings = Settings::resolve_from(Some(&config), no_env());
        assert_eq!(settings.inference.base_url, "http://gpu-box:11434/");
        assert_eq!(settings.inference.model, "qwen2.5-coder:7b");
        assert_eq!(settings.inference.timeout, Duration::from_secs(30));
        assert_eq!(settings.analysis_delay, Duration::from_secs(120));
        assert_eq!(settings.registration.ttl().num_seconds(), 300);
        assert_eq!(settings.registration.max_attempts(), 3);
    }

    #[test]
    fn env_wins_over_file() {
        let config = parse(
            r#"
            [ollama]
            url = "http://file:11434"
            model = "file-model"
            timeout_ms = 1000
            "#,
        );
        let env = env_of(&[
            ("OLLAMA_URL", "http://env:11434"),
            ("OLLAMA_MODEL", "env-model"),
            ("OLLAMA_TIMEOUT", "2500"),
        ]);
        let settings = Settings::resolve_from(Some(&config), env);
        assert_eq!(settings.inference.base_url, "http://env:11434");
        assert_eq!(settings.inference.model, "env-model");
        assert_eq!(settings.inference.timeout, Duration::from_millis(2500));
    }

    #[test]
    fn blank_env_does_not_override_file() {
        let config = parse("[ollama]\nmodel = \"file-model\"\n");
        let settings = Settings::resolve_from(Some(&config), env_of(&[("OLLAMA_MODEL", "  ")]));
        assert_eq!(settings.inference.model, "file-model");
    }

    #[test]
    fn invalid_timeouts_fall_back() {
        let settings =
            Settings::resolve_from(None, env_of(&[("OLLAMA_TIMEOUT", "three minutes")]));
        assert_eq!(settings.inference.timeout, DEFAULT_TIMEOUT);

        let config = parse("[ollama]\ntimeout_ms = 0\n");
        let settings = Settings::resolve_from(Some(&config), no_env());
        assert_eq!(settings.inference.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn invalid_env_timeout_defers_to_file() {
        let config = parse("[ollama]\ntimeout_ms = 5000\n");
        let settings = Settings::resolve_from(Some(&config), env_of(&[("OLLAMA_TIMEOUT", "-1")]));
        assert_eq!(settings.inference.timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_attempts_keeps_configured_ttl() {
        let config = parse("[registration]\nttl_secs = 120\nmax_attempts = 0\n");
        let settings = Settings::resolve_from(Some(&config), no_env());
        assert_eq!(settings.registration.max_attempts(), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(settings.registration.ttl().num_seconds(), 120);
    }

    #[test]
    fn oversized_durations_fall_back() {
        let config = parse(
            "[registration]\nttl_secs = 999999999\n\n[analysis]\ndelay_secs = 999999999\n",
        );
        let settings = Settings::resolve_from(Some(&config), no_env());
        assert_eq!(settings.registration.ttl().num_seconds(), 600);
        assert_eq!(settings.analysis_delay, DEFAULT_DELAY);
    }

    #[test]
    fn mail_credentials_from_file_with_expansion() {
        let config = parse(
            r#"
            [email]
            service = "fastmail"
            user = "bot@example.com"
            pass = "${MAIL_SECRET}"
            "#,
        );
        let settings =
            Settings::resolve_from(Some(&config), env_of(&[("MAIL_SECRET", "hunter2")]));
        let mail = settings.mail.unwrap();
        assert_eq!(mail.service, "fastmail");
        assert_eq!(mail.user, "bot@example.com");
        assert_eq!(mail.pass, "hunter2");
    }

    #[test]
    fn mail_credentials_from_env_default_service() {
        let env = env_of(&[("EMAIL_USER", "bot@example.com"), ("EMAIL_PASS", "secret")]);
        let mail = Settings::resolve_from(None, env).mail.unwrap();
        assert_eq!(mail.service, DEFAULT_EMAIL_SERVICE);
        assert_eq!(mail.user, "bot@example.com");
    }

    #[test]
    fn incomplete_mail_credentials_are_ignored() {
        let settings = Settings::resolve_from(None, env_of(&[("EMAIL_USER", "bot@example.com")]));
        assert!(settings.mail.is_none());

        // Expands to nothing, so the password is missing.
        let config = parse("[email]\nuser = \"bot@example.com\"\npass = \"${UNSET_SECRET}\"\n");
        assert!(Settings::resolve_from(Some(&config), no_env()).mail.is_none());
    }

    #[test]
    fn debug_output_redacts_passwords() {
        let config = parse("[email]\nuser = \"bot@example.com\"\npass = \"hunter2\"\n");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));

        let settings = Settings::resolve_from(Some(&config), no_env());
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("hunter2"));
    }

    // file loading tests

    #[test]
    fn load_from_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = PrismConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn load_from_reads_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[analysis]\ndelay_secs = 5\n").unwrap();

        let config = PrismConfig::load_from(&path).unwrap().unwrap();
        assert_eq!(config.analysis.unwrap().delay_secs, Some(5));
        assert!(config.ollama.is_none());
    }

    #[test]
    fn load_from_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[ollama\nurl = ").unwrap();

        let err = PrismConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), path.as_path());
    }

    #[test]
    fn config_path_lives_under_dot_prism() {
        if let Some(path) = config_path() {
            assert!(path.ends_with(".prism/config.toml"));
        }
    }
}
