// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Livebuild

// Backend API
pub const LIVEBUILD_API_URL: &str = "LIVEBUILD_API_URL";
pub const API_URL: &str = "API_URL"; // Legacy
pub const LIVEBUILD_ACCESS_TOKEN: &str = "LIVEBUILD_ACCESS_TOKEN";
pub const LIVEBUILD_HTTP_REQUEST_TIMEOUT_SECS: &str = "LIVEBUILD_HTTP_REQUEST_TIMEOUT_SECS";
pub const LIVEBUILD_DEPLOY_DOMAIN: &str = "LIVEBUILD_DEPLOY_DOMAIN";

// Session
pub const LIVEBUILD_SESSION_ID: &str = "LIVEBUILD_SESSION_ID";
pub const LIVEBUILD_POLL_INTERVAL_MS: &str = "LIVEBUILD_POLL_INTERVAL_MS";
pub const LIVEBUILD_MAX_POLL_MINUTES: &str = "LIVEBUILD_MAX_POLL_MINUTES";
pub const LIVEBUILD_PRIMARY_NODE: &str = "LIVEBUILD_PRIMARY_NODE";

// Artifact fetching
pub const LIVEBUILD_FETCH_MAX_ATTEMPTS: &str = "LIVEBUILD_FETCH_MAX_ATTEMPTS";
pub const LIVEBUILD_FETCH_RETRY_DELAY_MS: &str = "LIVEBUILD_FETCH_RETRY_DELAY_MS";

// Sandbox / preview
pub const LIVEBUILD_SANDBOX_ROOT: &str = "LIVEBUILD_SANDBOX_ROOT";
pub const LIVEBUILD_INSTALL_COMMAND: &str = "LIVEBUILD_INSTALL_COMMAND";
pub const LIVEBUILD_DEV_COMMAND: &str = "LIVEBUILD_DEV_COMMAND";
pub const LIVEBUILD_CRITICAL_DEPENDENCY: &str = "LIVEBUILD_CRITICAL_DEPENDENCY";
pub const LIVEBUILD_ERROR_OUTPUT_LIMIT: &str = "LIVEBUILD_ERROR_OUTPUT_LIMIT";
pub const LIVEBUILD_SECURE_CONTEXT: &str = "LIVEBUILD_SECURE_CONTEXT";
pub const LIVEBUILD_CROSS_ORIGIN_ISOLATED: &str = "LIVEBUILD_CROSS_ORIGIN_ISOLATED";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
