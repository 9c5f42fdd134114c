//! Endpoint defaults
//!
//! Paths are relative to the configured API base URL and match the REST
//! backend's auth routes. All of them can be overridden in the client config.

/// Token refresh endpoint (exchange a refresh credential for a new access credential)
pub const DEFAULT_REFRESH_PATH: &str = "/auth/token/refresh/";

/// Login endpoint (public)
pub const DEFAULT_LOGIN_PATH: &str = "/auth/login/";

/// Registration endpoint (public)
pub const DEFAULT_REGISTER_PATH: &str = "/auth/register/";

/// Logout endpoint (authenticated)
pub const DEFAULT_LOGOUT_PATH: &str = "/auth/logout/";
