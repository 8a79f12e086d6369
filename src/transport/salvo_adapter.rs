//! Salvo request/response transport

use salvo_core::http::cookie::{self, Cookie};
use salvo_core::http::header::{HeaderName, HeaderValue};
use salvo_core::{Request, Response};

use super::{CredentialOptions, CredentialSink, CredentialSource};
use crate::config::SameSite;

impl CredentialSource for Request {
    /// Cookie first, then the URL query when allowed; an enabled header wins
    fn read_credential(&self, options: &CredentialOptions) -> Option<String> {
        let mut sid = self
            .cookie(&options.name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty());

        if sid.is_none() && options.from_query {
            sid = self
                .query::<String>(&options.name)
                .filter(|v| !v.is_empty());
        }

        if let Some(header) = &options.header_name {
            let from_header = self
                .headers()
                .get(header.as_str())
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty());
            if let Some(value) = from_header {
                sid = Some(value.to_string());
            }
        }

        // cookie values may arrive URL encoded
        sid.map(|value| match urlencoding::decode(&value) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => value,
        })
    }
}

impl CredentialSink for Response {
    fn write_credential(&mut self, id: &str, options: &CredentialOptions) {
        if options.set_cookie {
            let mut builder = Cookie::build((options.name.clone(), id.to_string()))
                .path(options.path.clone())
                .http_only(options.http_only)
                .secure(options.secure)
                .same_site(cookie_same_site(options.same_site));

            if let Some(domain) = &options.domain {
                builder = builder.domain(domain.clone());
            }
            if let Some(lifetime) = options.lifetime {
                builder = builder.max_age(cookie::time::Duration::seconds(lifetime.as_secs() as i64));
            }

            self.add_cookie(builder.build());
        }

        if let Some(header) = &options.header_name {
            match (
                HeaderName::from_bytes(header.as_bytes()),
                HeaderValue::from_str(id),
            ) {
                (Ok(name), Ok(value)) => {
                    self.headers_mut().insert(name, value);
                }
                _ => tracing::warn!("Cannot write session header {}", header),
            }
        }
    }

    fn clear_credential(&mut self, options: &CredentialOptions) {
        if options.set_cookie {
            let mut builder = Cookie::build((options.name.clone(), String::new()))
                .path(options.path.clone())
                .http_only(options.http_only)
                .max_age(cookie::time::Duration::ZERO);

            if let Some(domain) = &options.domain {
                builder = builder.domain(domain.clone());
            }

            self.add_cookie(builder.build());
        }

        if let Some(header) = &options.header_name {
            if let Ok(name) = HeaderName::from_bytes(header.as_bytes()) {
                self.headers_mut().remove(name);
            }
        }
    }
}

fn cookie_same_site(same_site: SameSite) -> cookie::SameSite {
    match same_site {
        SameSite::Strict => cookie::SameSite::Strict,
        SameSite::Lax => cookie::SameSite::Lax,
        SameSite::None => cookie::SameSite::None,
    }
}
