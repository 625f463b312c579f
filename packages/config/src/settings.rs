// ABOUTME: Typed runtime settings assembled from environment variables
// ABOUTME: Groups backend API, sandbox preview and build session knobs with defaults

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::constants::*;
use crate::env::{
    parse_bool_env, parse_duration_ms_env, parse_env_or_default_with_validation, string_env,
    string_env_with_fallback,
};

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_DEPLOY_DOMAIN: &str = "livebuild.app";
pub const DEFAULT_FETCH_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_FETCH_RETRY_DELAY: Duration = Duration::from_millis(2500);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_POLL_MINUTES: u64 = 30;
pub const DEFAULT_INSTALL_COMMAND: &str =
    "npm install --legacy-peer-deps --no-audit --no-fund --no-progress";
pub const DEFAULT_DEV_COMMAND: &str = "npm run dev";
pub const DEFAULT_CRITICAL_DEPENDENCY: &str = "node_modules/vite/package.json";
pub const DEFAULT_ERROR_OUTPUT_LIMIT: usize = 500;
pub const DEFAULT_PRIMARY_NODE: &str = "assistant";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid API URL '{url}': {reason}")]
    InvalidApiUrl { url: String, reason: String },
    #[error("Invalid command for {name}: command line is empty")]
    EmptyCommand { name: &'static str },
}

/// A program plus its arguments, parsed from a whitespace separated line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn parse(name: &'static str, line: &str) -> Result<Self, ConfigError> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(ConfigError::EmptyCommand { name })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub access_token: Option<String>,
    pub request_timeout: Duration,
    pub deploy_domain: String,
}

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    /// Directory the local sandbox mounts into. `None` uses a temp directory.
    pub sandbox_root: Option<PathBuf>,
    pub fetch_max_attempts: u32,
    pub fetch_retry_delay: Duration,
    pub install_command: CommandLine,
    pub dev_command: CommandLine,
    /// Path relative to the sandbox root that must exist after install.
    pub critical_dependency: String,
    pub error_output_limit: usize,
    pub dev_env: Vec<(String, String)>,
    pub secure_context: bool,
    pub cross_origin_isolated: bool,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub session_id: Option<String>,
    pub poll_interval: Duration,
    /// Upper bound on a single job's polling. `None` polls until terminal.
    pub max_poll_duration: Option<Duration>,
    pub primary_node: String,
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub api: ApiSettings,
    pub preview: PreviewSettings,
    pub session: SessionSettings,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            access_token: None,
            request_timeout: Duration::from_secs(30),
            deploy_domain: DEFAULT_DEPLOY_DOMAIN.to_string(),
        }
    }
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            sandbox_root: None,
            fetch_max_attempts: DEFAULT_FETCH_MAX_ATTEMPTS,
            fetch_retry_delay: DEFAULT_FETCH_RETRY_DELAY,
            install_command: CommandLine {
                program: "npm".to_string(),
                args: DEFAULT_INSTALL_COMMAND
                    .split_whitespace()
                    .skip(1)
                    .map(str::to_string)
                    .collect(),
            },
            dev_command: CommandLine {
                program: "npm".to_string(),
                args: vec!["run".to_string(), "dev".to_string()],
            },
            critical_dependency: DEFAULT_CRITICAL_DEPENDENCY.to_string(),
            error_output_limit: DEFAULT_ERROR_OUTPUT_LIMIT,
            dev_env: default_dev_env(),
            secure_context: true,
            cross_origin_isolated: true,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_id: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_duration: Some(Duration::from_secs(DEFAULT_MAX_POLL_MINUTES * 60)),
            primary_node: DEFAULT_PRIMARY_NODE.to_string(),
        }
    }
}

/// Environment handed to the dev server. The memory watcher restarts the
/// server under sandbox memory accounting, so it is switched off.
fn default_dev_env() -> Vec<(String, String)> {
    vec![(
        "__NEXT_DISABLE_MEMORY_WATCHER".to_string(),
        "1".to_string(),
    )]
}

/// Accept only absolute http(s) URLs; the trailing slash is dropped.
fn validate_api_url(url: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(url).map_err(|e| ConfigError::InvalidApiUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidApiUrl {
            url: url.to_string(),
            reason: "scheme must be http or https".to_string(),
        });
    }
    Ok(url.trim_end_matches('/').to_string())
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api: ApiSettings::from_env()?,
            preview: PreviewSettings::from_env()?,
            session: SessionSettings::from_env(),
        })
    }
}

impl ApiSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let base_url = validate_api_url(
            &string_env_with_fallback(LIVEBUILD_API_URL, API_URL).unwrap_or(defaults.base_url),
        )?;

        let timeout_secs = parse_env_or_default_with_validation(
            LIVEBUILD_HTTP_REQUEST_TIMEOUT_SECS,
            defaults.request_timeout.as_secs(),
            |v| v > 0 && v <= 3600,
        );

        Ok(Self {
            base_url,
            access_token: string_env(LIVEBUILD_ACCESS_TOKEN),
            request_timeout: Duration::from_secs(timeout_secs),
            deploy_domain: string_env(LIVEBUILD_DEPLOY_DOMAIN).unwrap_or(defaults.deploy_domain),
        })
    }

    /// Replace the base URL, validating it the same way as the environment.
    pub fn with_base_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.base_url = validate_api_url(url)?;
        Ok(self)
    }
}

impl PreviewSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let install_command = match string_env(LIVEBUILD_INSTALL_COMMAND) {
            Some(line) => CommandLine::parse("install", &line)?,
            None => defaults.install_command,
        };
        let dev_command = match string_env(LIVEBUILD_DEV_COMMAND) {
            Some(line) => CommandLine::parse("dev server", &line)?,
            None => defaults.dev_command,
        };

        Ok(Self {
            sandbox_root: string_env(LIVEBUILD_SANDBOX_ROOT).map(PathBuf::from),
            fetch_max_attempts: parse_env_or_default_with_validation(
                LIVEBUILD_FETCH_MAX_ATTEMPTS,
                defaults.fetch_max_attempts,
                |v| v > 0 && v <= 100,
            ),
            fetch_retry_delay: parse_duration_ms_env(
                LIVEBUILD_FETCH_RETRY_DELAY_MS,
                defaults.fetch_retry_delay,
            ),
            install_command,
            dev_command,
            critical_dependency: string_env(LIVEBUILD_CRITICAL_DEPENDENCY)
                .unwrap_or(defaults.critical_dependency),
            error_output_limit: parse_env_or_default_with_validation(
                LIVEBUILD_ERROR_OUTPUT_LIMIT,
                defaults.error_output_limit,
                |v| v >= 50,
            ),
            dev_env: defaults.dev_env,
            secure_context: parse_bool_env(LIVEBUILD_SECURE_CONTEXT, true),
            cross_origin_isolated: parse_bool_env(LIVEBUILD_CROSS_ORIGIN_ISOLATED, true),
        })
    }
}

impl SessionSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        // 0 disables the bound entirely
        let max_minutes = parse_env_or_default_with_validation(
            LIVEBUILD_MAX_POLL_MINUTES,
            DEFAULT_MAX_POLL_MINUTES,
            |v| v <= 24 * 60,
        );

        Self {
            session_id: string_env(LIVEBUILD_SESSION_ID),
            poll_interval: parse_duration_ms_env(LIVEBUILD_POLL_INTERVAL_MS, defaults.poll_interval),
            max_poll_duration: (max_minutes > 0).then(|| Duration::from_secs(max_minutes * 60)),
            primary_node: string_env(LIVEBUILD_PRIMARY_NODE).unwrap_or(defaults.primary_node),
        }
    }
}
