//! Session manager configuration

use serde::Deserialize;
use std::time::Duration;

use crate::error::SessionError;
use crate::id::DEFAULT_ID_LENGTH;
use crate::transport::CredentialOptions;

/// Configuration for the session manager
///
/// Built once at startup and frozen when handed to [`crate::Manager`].
/// Durations are expressed in seconds, matching the provider contract.
///
/// JSON keys are camelCase. The older spellings (`gclifetime`,
/// `sessionIDLength`, `EnableSidInHTTPHeader`, ...) are accepted as aliases
/// and unknown keys are rejected.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SessionConfig {
    /// Name of the session cookie, also the URL query key (default: "session_id")
    pub cookie_name: String,

    /// Whether to write the session cookie on responses (default: true)
    pub enable_set_cookie: bool,

    /// Interval between GC sweeps in seconds (default: 3600)
    #[serde(alias = "gclifetime")]
    pub gc_lifetime: u64,

    /// Max idle lifetime of a session in seconds (default: 0 = same as gc_lifetime)
    pub max_lifetime: u64,

    /// Cookie max age in seconds (default: 0 = browser session cookie)
    #[serde(alias = "cookieLifeTime")]
    pub cookie_lifetime: u64,

    /// Cookie path (default: "/")
    pub cookie_path: String,

    /// Cookie domain (default: None - current domain only)
    pub domain: Option<String>,

    /// Secure flag for cookie (default: false)
    pub secure: bool,

    /// HttpOnly flag for cookie (default: true)
    pub http_only: bool,

    /// SameSite attribute for cookie
    #[serde(alias = "cookieSameSite")]
    pub same_site: SameSite,

    /// Number of random bytes in a session ID (default: 16)
    #[serde(alias = "sessionIDLength")]
    pub session_id_length: usize,

    /// Fixed prefix prepended to every session ID (default: "")
    #[serde(alias = "sessionIDPrefix")]
    pub session_id_prefix: String,

    /// Provider specific configuration, passed through untouched
    pub provider_config: String,

    /// Also carry the session ID in a request/response header (default: false)
    #[serde(alias = "EnableSidInHTTPHeader")]
    pub enable_sid_in_http_header: bool,

    /// Header used when `enable_sid_in_http_header` is set
    #[serde(alias = "SessionNameInHTTPHeader")]
    pub session_name_in_http_header: String,

    /// Accept the session ID from the URL query when no cookie is sent (default: false)
    #[serde(alias = "EnableSidInURLQuery")]
    pub enable_sid_in_url_query: bool,

    /// Deadline for each provider/store call in milliseconds (default: None)
    pub operation_timeout_ms: Option<u64>,
}

/// SameSite cookie attribute
///
/// Deserializes from `"Strict"`, `"Lax"` or `"None"` (any case), or from the
/// numeric codes 1-4 used by older configs (1 = default, i.e. Lax).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "SameSiteRepr")]
pub enum SameSite {
    /// Strict - cookie only sent for same-site requests
    Strict,
    /// Lax - cookie sent for same-site requests and top-level navigations
    Lax,
    /// None - cookie sent for all requests (requires Secure)
    None,
}

impl Default for SameSite {
    fn default() -> Self {
        SameSite::Lax
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SameSiteRepr {
    Name(String),
    Code(u8),
}

impl TryFrom<SameSiteRepr> for SameSite {
    type Error = String;

    fn try_from(repr: SameSiteRepr) -> Result<Self, Self::Error> {
        match repr {
            SameSiteRepr::Name(name) => match name.to_ascii_lowercase().as_str() {
                "strict" => Ok(SameSite::Strict),
                "lax" => Ok(SameSite::Lax),
                "none" => Ok(SameSite::None),
                _ => Err(format!("unknown same-site policy: {}", name)),
            },
            SameSiteRepr::Code(1 | 2) => Ok(SameSite::Lax),
            SameSiteRepr::Code(3) => Ok(SameSite::Strict),
            SameSiteRepr::Code(4) => Ok(SameSite::None),
            SameSiteRepr::Code(code) => Err(format!("unknown same-site code: {}", code)),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session_id".to_string(),
            enable_set_cookie: true,
            gc_lifetime: 3600,
            max_lifetime: 0,
            cookie_lifetime: 0,
            cookie_path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: true,
            same_site: SameSite::Lax,
            session_id_length: DEFAULT_ID_LENGTH,
            session_id_prefix: String::new(),
            provider_config: String::new(),
            enable_sid_in_http_header: false,
            session_name_in_http_header: String::new(),
            enable_sid_in_url_query: false,
            operation_timeout_ms: None,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with the given cookie name
    pub fn new<S: Into<String>>(cookie_name: S) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON; missing fields keep their defaults
    ///
    /// Also understands the inverted `disableHTTPOnly` flag.
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let invalid = |e: serde_json::Error| SessionError::InvalidConfig(e.to_string());

        let mut document: serde_json::Value = serde_json::from_str(json).map_err(invalid)?;
        if let Some(fields) = document.as_object_mut() {
            if let Some(disable) = fields.remove("disableHTTPOnly") {
                let disable = disable.as_bool().ok_or_else(|| {
                    SessionError::InvalidConfig("disableHTTPOnly must be a boolean".to_string())
                })?;
                if fields.contains_key("httpOnly") {
                    return Err(SessionError::InvalidConfig(
                        "httpOnly and disableHTTPOnly are mutually exclusive".to_string(),
                    ));
                }
                fields.insert("httpOnly".to_string(), serde_json::Value::Bool(!disable));
            }
        }
        serde_json::from_value(document).map_err(invalid)
    }

    /// Set the cookie name (default: "session_id")
    pub fn with_cookie_name<S: Into<String>>(mut self, name: S) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Set whether the session cookie is written on responses (default: true)
    pub fn with_set_cookie(mut self, enable: bool) -> Self {
        self.enable_set_cookie = enable;
        self
    }

    /// Set the GC sweep interval in seconds
    pub fn with_gc_lifetime(mut self, secs: u64) -> Self {
        self.gc_lifetime = secs;
        self
    }

    /// Set the max idle lifetime of a session in seconds
    pub fn with_max_lifetime(mut self, secs: u64) -> Self {
        self.max_lifetime = secs;
        self
    }

    /// Set the cookie max age in seconds (0 = browser session cookie)
    pub fn with_cookie_lifetime(mut self, secs: u64) -> Self {
        self.cookie_lifetime = secs;
        self
    }

    /// Set the cookie path (default: "/")
    pub fn with_cookie_path<S: Into<String>>(mut self, path: S) -> Self {
        self.cookie_path = path.into();
        self
    }

    /// Set the cookie domain
    pub fn with_domain<S: Into<String>>(mut self, domain: S) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the Secure flag (default: false)
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the HttpOnly flag (default: true)
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Set the SameSite attribute (default: Lax)
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    /// Set the number of random bytes in a session ID
    pub fn with_session_id_length(mut self, length: usize) -> Self {
        self.session_id_length = length;
        self
    }

    /// Set the fixed session ID prefix
    pub fn with_session_id_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.session_id_prefix = prefix.into();
        self
    }

    /// Set the provider specific configuration string
    pub fn with_provider_config<S: Into<String>>(mut self, config: S) -> Self {
        self.provider_config = config.into();
        self
    }

    /// Carry the session ID in the given header as well
    pub fn with_sid_in_http_header<S: Into<String>>(mut self, header: S) -> Self {
        self.enable_sid_in_http_header = true;
        self.session_name_in_http_header = header.into();
        self
    }

    /// Accept the session ID from the URL query
    pub fn with_sid_in_url_query(mut self, enable: bool) -> Self {
        self.enable_sid_in_url_query = enable;
        self
    }

    /// Bound every provider/store call by this deadline
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Check the configuration and fill in derived defaults
    pub(crate) fn validated(mut self) -> Result<Self, SessionError> {
        if self.cookie_name.trim().is_empty() {
            return Err(SessionError::InvalidConfig(
                "cookie name must not be empty".to_string(),
            ));
        }
        if self.gc_lifetime == 0 {
            return Err(SessionError::InvalidConfig(
                "gc lifetime must be at least one second".to_string(),
            ));
        }
        if self.enable_sid_in_http_header && self.session_name_in_http_header.trim().is_empty() {
            return Err(SessionError::InvalidConfig(
                "session header name must be set when header transport is enabled".to_string(),
            ));
        }
        if self.max_lifetime == 0 {
            self.max_lifetime = self.gc_lifetime;
        }
        if self.session_id_length == 0 {
            self.session_id_length = DEFAULT_ID_LENGTH;
        }
        Ok(self)
    }

    /// GC sweep interval as Duration
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_lifetime)
    }

    /// Max idle lifetime as Duration
    pub fn max_lifetime_duration(&self) -> Duration {
        Duration::from_secs(self.max_lifetime)
    }

    /// Per-operation deadline, if any
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    /// Transport metadata derived from this configuration
    pub fn credential_options(&self) -> CredentialOptions {
        CredentialOptions {
            name: self.cookie_name.clone(),
            path: self.cookie_path.clone(),
            domain: self.domain.clone().filter(|d| !d.is_empty()),
            lifetime: match self.cookie_lifetime {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            secure: self.secure,
            http_only: self.http_only,
            same_site: self.same_site,
            set_cookie: self.enable_set_cookie,
            header_name: if self.enable_sid_in_http_header {
                Some(self.session_name_in_http_header.clone())
            } else {
                None
            },
            from_query: self.enable_sid_in_url_query,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_fills_defaults() {
        let config = SessionConfig::default()
            .with_gc_lifetime(60)
            .with_session_id_length(0)
            .validated()
            .unwrap();

        assert_eq!(config.max_lifetime, 60);
        assert_eq!(config.session_id_length, DEFAULT_ID_LENGTH);
    }

    #[test]
    fn test_validated_rejects_bad_config() {
        let err = SessionConfig::new("").validated().unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));

        let err = SessionConfig::default().with_gc_lifetime(0).validated().unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));

        let err = SessionConfig::default()
            .with_sid_in_http_header("  ")
            .validated()
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
    }

    #[test]
    fn test_from_json() {
        let config = SessionConfig::from_json(
            r#"{
                "cookieName": "sid",
                "gcLifetime": 30,
                "maxLifetime": 120,
                "cookieLifetime": 600,
                "sameSite": "Strict",
                "sessionIdPrefix": "eu-",
                "providerConfig": "127.0.0.1:6379,10"
            }"#,
        )
        .unwrap();

        assert_eq!(config.cookie_name, "sid");
        assert_eq!(config.gc_lifetime, 30);
        assert_eq!(config.max_lifetime, 120);
        assert_eq!(config.same_site, SameSite::Strict);
        assert_eq!(config.session_id_prefix, "eu-");
        assert_eq!(config.provider_config, "127.0.0.1:6379,10");
        // untouched fields keep their defaults
        assert!(config.enable_set_cookie);
        assert!(config.http_only);

        let options = config.credential_options();
        assert_eq!(options.lifetime, Some(Duration::from_secs(600)));
        assert_eq!(options.header_name, None);
    }

    #[test]
    fn test_from_json_legacy_keys() {
        let config = SessionConfig::from_json(
            r#"{
                "cookieName": "gosessionid",
                "gclifetime": 30,
                "maxLifetime": 60,
                "cookieLifeTime": 600,
                "sessionIDLength": 32,
                "sessionIDPrefix": "eu-",
                "disableHTTPOnly": true,
                "cookieSameSite": 3,
                "domain": "",
                "EnableSidInHTTPHeader": true,
                "SessionNameInHTTPHeader": "X-Session-Id",
                "EnableSidInURLQuery": true
            }"#,
        )
        .unwrap();

        assert_eq!(config.gc_lifetime, 30);
        assert_eq!(config.cookie_lifetime, 600);
        assert_eq!(config.session_id_length, 32);
        assert_eq!(config.session_id_prefix, "eu-");
        assert!(!config.http_only);
        assert_eq!(config.same_site, SameSite::Strict);

        let options = config.credential_options();
        assert_eq!(options.domain, None);
        assert_eq!(options.header_name.as_deref(), Some("X-Session-Id"));
        assert!(options.from_query);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        for json in [
            "{ not json",
            r#"{"gcLifeTimeSecs": 30}"#,
            r#"{"sameSite": "sometimes"}"#,
            r#"{"disableHTTPOnly": "yes"}"#,
            r#"{"disableHTTPOnly": true, "httpOnly": true}"#,
        ] {
            let err = SessionConfig::from_json(json).unwrap_err();
            assert!(matches!(err, SessionError::InvalidConfig(_)), "accepted {}", json);
        }
    }
}
