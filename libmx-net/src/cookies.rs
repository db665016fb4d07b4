use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use tracing::debug;

use crate::headers::HeaderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            ..Self::default()
        }
    }

    /// Parses one `Set-Cookie` value.
    pub fn parse_set_cookie(value: &str) -> Result<Self, HeaderError> {
        let mut parts = value.split(';');
        let pair = parts.next().unwrap_or("");
        let (name, cookie_value) = split_pair(pair)
            .ok_or_else(|| HeaderError::invalid("Set-Cookie", "missing name=value"))?;
        let mut cookie = Cookie::new(name, unquote(cookie_value));

        for attribute in parts {
            let attribute = attribute.trim();
            if attribute.is_empty() {
                continue;
            }
            let (key, argument) = match attribute.split_once('=') {
                Some((key, argument)) => (key.trim(), argument.trim()),
                None => (attribute, ""),
            };
            match key.to_ascii_lowercase().as_str() {
                "domain" => {
                    let domain = argument.trim_start_matches('.');
                    if !domain.is_empty() {
                        cookie.domain = Some(domain.to_ascii_lowercase());
                    }
                }
                "path" => {
                    if argument.starts_with('/') {
                        cookie.path = Some(argument.to_string());
                    }
                }
                "expires" => match parse_http_date(unquote(argument)) {
                    Some(expires) if cookie.max_age.is_none() => cookie.expires = Some(expires),
                    Some(_) => {}
                    None => debug!(
                        cookie = %cookie.name,
                        expires = argument,
                        "unreadable cookie expiry ignored"
                    ),
                },
                "max-age" => {
                    let seconds = parse_max_age(argument).ok_or_else(|| {
                        HeaderError::invalid("Set-Cookie", format!("bad max-age {argument:?}"))
                    })?;
                    cookie.max_age = Some(seconds);
                    cookie.expires = Duration::try_seconds(seconds)
                        .and_then(|delta| Utc::now().checked_add_signed(delta));
                }
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => {
                    cookie.same_site = match argument.to_ascii_lowercase().as_str() {
                        "strict" => Some(SameSite::Strict),
                        "lax" => Some(SameSite::Lax),
                        "none" => Some(SameSite::None),
                        _ => None,
                    };
                }
                // comment, discard, port, version and extensions carry nothing we keep
                _ => {}
            }
        }

        Ok(cookie)
    }

    /// Value for a `Set-Cookie` header.
    pub fn to_set_cookie(&self) -> String {
        let mut value = format!("{}={}", self.name, self.value);
        if let Some(domain) = &self.domain {
            value.push_str("; Domain=");
            value.push_str(domain);
        }
        if let Some(path) = &self.path {
            value.push_str("; Path=");
            value.push_str(path);
        }
        if let Some(max_age) = self.max_age {
            value.push_str(&format!("; Max-Age={max_age}"));
        } else if let Some(expires) = self.expires {
            value.push_str("; Expires=");
            value.push_str(&expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
        }
        if self.secure {
            value.push_str("; Secure");
        }
        if self.http_only {
            value.push_str("; HttpOnly");
        }
        match self.same_site {
            Some(SameSite::Strict) => value.push_str("; SameSite=Strict"),
            Some(SameSite::Lax) => value.push_str("; SameSite=Lax"),
            Some(SameSite::None) => value.push_str("; SameSite=None"),
            None => {}
        }
        value
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }
}

/// Ordered cookie collection. A cookie with the same name, domain and path replaces the older one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a request `Cookie` header, skipping `$Version`-style attributes.
    pub fn parse_cookie_header(&mut self, value: &str) -> Result<(), HeaderError> {
        for pair in value.split(';') {
            if pair.trim().is_empty() {
                continue;
            }
            let (name, cookie_value) = split_pair(pair)
                .ok_or_else(|| HeaderError::invalid("Cookie", format!("bad pair {pair:?}")))?;
            if name.starts_with('$') {
                continue;
            }
            self.add(Cookie::new(name, unquote(cookie_value)));
        }
        Ok(())
    }

    pub fn parse_set_cookie(&mut self, value: &str) -> Result<(), HeaderError> {
        self.add(Cookie::parse_set_cookie(value)?);
        Ok(())
    }

    pub fn add(&mut self, cookie: Cookie) {
        let existing = self.cookies.iter_mut().find(|item| {
            item.name == cookie.name && item.domain == cookie.domain && item.path == cookie.path
        });
        match existing {
            Some(slot) => *slot = cookie,
            None => self.cookies.push(cookie),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|cookie| cookie.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }
}

fn split_pair(pair: &str) -> Option<(&str, &str)> {
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() || name.contains([' ', '\t']) {
        return None;
    }
    Some((name, value.trim()))
}

// RFC 850 and Netscape dates, then asctime; all in GMT
const HTTP_DATE_FORMATS: [&str; 3] = [
    "%A, %d-%b-%y %H:%M:%S GMT",
    "%a, %d-%b-%Y %H:%M:%S GMT",
    "%a %b %e %H:%M:%S %Y",
];

/// Reads the date forms cookies are sent with: IMF-fixdate (RFC 1123), RFC 850,
/// the Netscape dashed form and asctime.
fn parse_http_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(text) {
        return Some(date.with_timezone(&Utc));
    }
    HTTP_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|date| date.and_utc())
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_max_age(argument: &str) -> Option<i64> {
    let digits = argument.strip_prefix('-').unwrap_or(argument);
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    argument.parse::<i64>().ok()
}
