//! Session ID transport
//!
//! The manager never touches raw HTTP. It reads a candidate ID through
//! [`CredentialSource`] and writes or clears it through [`CredentialSink`].

use std::time::Duration;

use crate::config::SameSite;

mod salvo_adapter;

/// Where and how the session ID travels
#[derive(Clone, Debug, PartialEq)]
pub struct CredentialOptions {
    /// Cookie name, also used as the URL query key
    pub name: String,
    /// Cookie path
    pub path: String,
    /// Cookie domain
    pub domain: Option<String>,
    /// Cookie max age (None = browser session cookie)
    pub lifetime: Option<Duration>,
    /// Secure flag
    pub secure: bool,
    /// HttpOnly flag
    pub http_only: bool,
    /// SameSite attribute
    pub same_site: SameSite,
    /// Whether the cookie is written at all
    pub set_cookie: bool,
    /// Header carrying the ID, when header transport is enabled
    pub header_name: Option<String>,
    /// Whether the ID may be read from the URL query
    pub from_query: bool,
}

impl CredentialOptions {
    /// Whether writing a credential has any effect
    pub fn writes_credential(&self) -> bool {
        self.set_cookie || self.header_name.is_some()
    }
}

/// Reads the incoming session ID, e.g. from a request
pub trait CredentialSource {
    /// The raw candidate ID, if the client sent one
    fn read_credential(&self, options: &CredentialOptions) -> Option<String>;
}

/// Writes the outgoing session ID, e.g. to a response
pub trait CredentialSink {
    /// Hand `id` to the client
    fn write_credential(&mut self, id: &str, options: &CredentialOptions);

    /// Tell the client to forget its session ID
    fn clear_credential(&mut self, options: &CredentialOptions);
}
