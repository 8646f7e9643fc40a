//! Credential Routing
//!
//! Maps an outbound target URL to the provider credential it requires.
//!
//! # Design
//!
//! Rules are an ordered list matched by URL substring. The first matching
//! rule wins; rules are never combined. Environment values are read once
//! when the router is built and never re-read while serving requests.
//!
//! Precedence between a caller-supplied header and an injected header of the
//! same name is decided by [`CredentialPrecedence`], not by insertion order.

use std::fmt;

// =============================================================================
// Rules
// =============================================================================

/// Header carrying the caller's bearer or basic credentials.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Where an injected credential is placed on the outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialPlacement {
    /// Sent as a request header with the given name.
    Header(String),
    /// Appended as a query parameter with the given name.
    QueryParam(String),
}

/// A static mapping from a URL pattern to the credential it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRule {
    /// Substring matched against the target URL.
    pub url_contains: String,
    /// Where the credential goes.
    pub placement: CredentialPlacement,
    /// Environment variable holding the credential value.
    pub env_var: String,
}

impl CredentialRule {
    /// Rule injecting a header.
    #[must_use]
    pub fn header(
        url_contains: impl Into<String>,
        header: impl Into<String>,
        env_var: impl Into<String>,
    ) -> Self {
        Self {
            url_contains: url_contains.into(),
            placement: CredentialPlacement::Header(header.into()),
            env_var: env_var.into(),
        }
    }

    /// Rule appending a query parameter.
    #[must_use]
    pub fn query_param(
        url_contains: impl Into<String>,
        param: impl Into<String>,
        env_var: impl Into<String>,
    ) -> Self {
        Self {
            url_contains: url_contains.into(),
            placement: CredentialPlacement::QueryParam(param.into()),
            env_var: env_var.into(),
        }
    }

    /// Whether this rule applies to the target URL.
    #[must_use]
    pub fn matches(&self, target_url: &str) -> bool {
        target_url.contains(&self.url_contains)
    }
}

/// The built-in provider table, in priority order.
#[must_use]
pub fn default_rules() -> Vec<CredentialRule> {
    vec![
        CredentialRule::header("indianapi.in", API_KEY_HEADER, "INDIAN_API_KEY"),
        CredentialRule::header("finnhub.io", "X-Finnhub-Token", "FINNHUB_API_KEY"),
        CredentialRule::query_param("alphavantage.co", "apikey", "ALPHA_VANTAGE_API_KEY"),
    ]
}

// =============================================================================
// Policies
// =============================================================================

/// Which side wins when caller and rule supply the same header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialPrecedence {
    /// Caller header beats the injected one.
    #[default]
    CallerFirst,
    /// Injected header overwrites the caller's.
    InjectedFirst,
}

impl CredentialPrecedence {
    /// Parse from a config string. Unknown values fall back to the default.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "injected-first" | "injected_first" | "injected" => Self::InjectedFirst,
            _ => Self::CallerFirst,
        }
    }

    /// Config name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CallerFirst => "caller-first",
            Self::InjectedFirst => "injected-first",
        }
    }
}

/// What to do when a matched rule's environment value is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingCredentialPolicy {
    /// Fail the request before calling upstream.
    #[default]
    Reject,
    /// Attach the credential with an empty value.
    SendEmpty,
}

impl MissingCredentialPolicy {
    /// Parse from a config string. Unknown values fall back to the default.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "send-empty" | "send_empty" | "empty" => Self::SendEmpty,
            _ => Self::Reject,
        }
    }

    /// Config name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::SendEmpty => "send-empty",
        }
    }
}

// =============================================================================
// Inbound Credentials
// =============================================================================

/// Credentials the caller sent with its own request.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct InboundCredentials {
    authorization: Option<String>,
    api_key: Option<String>,
}

impl InboundCredentials {
    /// Create inbound credentials. Empty values are treated as absent.
    #[must_use]
    pub fn new(authorization: Option<String>, api_key: Option<String>) -> Self {
        Self {
            authorization: authorization.filter(|v| !v.is_empty()),
            api_key: api_key.filter(|v| !v.is_empty()),
        }
    }

    /// No caller credentials.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(2);
        if let Some(v) = &self.authorization {
            headers.push((AUTHORIZATION_HEADER.to_string(), v.clone()));
        }
        if let Some(v) = &self.api_key {
            headers.push((API_KEY_HEADER.to_string(), v.clone()));
        }
        headers
    }
}

impl fmt::Debug for InboundCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundCredentials")
            .field("authorization", &self.authorization.as_ref().map(|_| "[REDACTED]"))
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// =============================================================================
// Router
// =============================================================================

/// A rule with its environment value captured at startup.
#[derive(Clone)]
pub struct ResolvedRule {
    rule: CredentialRule,
    value: Option<String>,
}

impl ResolvedRule {
    /// The underlying rule.
    #[must_use]
    pub const fn rule(&self) -> &CredentialRule {
        &self.rule
    }

    /// Whether a non-empty value was found.
    #[must_use]
    pub const fn has_value(&self) -> bool {
        self.value.is_some()
    }
}

impl fmt::Debug for ResolvedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedRule")
            .field("rule", &self.rule)
            .field("value", &self.value.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Credentials to attach to one outbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedCredentials {
    /// Header name/value pairs, caller passthrough included.
    pub headers: Vec<(String, String)>,
    /// Query parameter to append, if any.
    pub query_param: Option<(String, String)>,
}

impl ResolvedCredentials {
    /// Look up a header value by name, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Credential resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// The matched rule has no value configured.
    #[error("credential environment variable {env_var} is not set")]
    Missing {
        /// Variable that should hold the credential.
        env_var: String,
    },
}

/// Ordered, first-match credential lookup with an environment snapshot.
#[derive(Debug, Clone)]
pub struct CredentialRouter {
    rules: Vec<ResolvedRule>,
    precedence: CredentialPrecedence,
    missing: MissingCredentialPolicy,
}

impl CredentialRouter {
    /// Build a router, reading each rule's value through `lookup`.
    pub fn new<F>(
        rules: Vec<CredentialRule>,
        lookup: F,
        precedence: CredentialPrecedence,
        missing: MissingCredentialPolicy,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let value = lookup(&rule.env_var).filter(|v| !v.is_empty());
                ResolvedRule { rule, value }
            })
            .collect();

        Self {
            rules,
            precedence,
            missing,
        }
    }

    /// Build a router from the process environment.
    #[must_use]
    pub fn from_env(
        rules: Vec<CredentialRule>,
        precedence: CredentialPrecedence,
        missing: MissingCredentialPolicy,
    ) -> Self {
        Self::new(rules, |key| std::env::var(key).ok(), precedence, missing)
    }

    /// All rules in priority order.
    #[must_use]
    pub fn rules(&self) -> &[ResolvedRule] {
        &self.rules
    }

    /// Configured precedence.
    #[must_use]
    pub const fn precedence(&self) -> CredentialPrecedence {
        self.precedence
    }

    /// Configured missing-credential policy.
    #[must_use]
    pub const fn missing_policy(&self) -> MissingCredentialPolicy {
        self.missing
    }

    /// First rule matching the target URL.
    #[must_use]
    pub fn route(&self, target_url: &str) -> Option<&ResolvedRule> {
        self.rules.iter().find(|r| r.rule.matches(target_url))
    }

    /// Resolve the credentials for one outbound request.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Missing`] when the matched rule must be
    /// applied, has no value, and the policy is [`MissingCredentialPolicy::Reject`].
    pub fn resolve(
        &self,
        target_url: &str,
        inbound: &InboundCredentials,
    ) -> Result<ResolvedCredentials, CredentialError> {
        let mut resolved = ResolvedCredentials {
            headers: inbound.headers(),
            query_param: None,
        };

        let Some(matched) = self.route(target_url) else {
            return Ok(resolved);
        };

        match &matched.rule.placement {
            CredentialPlacement::Header(name) => {
                let existing = resolved
                    .headers
                    .iter()
                    .position(|(n, _)| n.eq_ignore_ascii_case(name));

                if existing.is_some() && self.precedence == CredentialPrecedence::CallerFirst {
                    return Ok(resolved);
                }

                let value = self.value_for(matched)?;
                match existing {
                    Some(idx) => resolved.headers[idx] = (name.clone(), value),
                    None => resolved.headers.push((name.clone(), value)),
                }
            }
            CredentialPlacement::QueryParam(param) => {
                // A parameter already in the URL always wins.
                if has_query_param(target_url, param) {
                    return Ok(resolved);
                }
                let value = self.value_for(matched)?;
                resolved.query_param = Some((param.clone(), value));
            }
        }

        Ok(resolved)
    }

    fn value_for(&self, matched: &ResolvedRule) -> Result<String, CredentialError> {
        match (&matched.value, self.missing) {
            (Some(value), _) => Ok(value.clone()),
            (None, MissingCredentialPolicy::SendEmpty) => Ok(String::new()),
            (None, MissingCredentialPolicy::Reject) => Err(CredentialError::Missing {
                env_var: matched.rule.env_var.clone(),
            }),
        }
    }
}

fn has_query_param(url: &str, param: &str) -> bool {
    let Some((_, query)) = url.split_once('?') else {
        return false;
    };
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .any(|pair| pair.split('=').next().is_some_and(|key| key == param))
}

// =============================================================================
// Tests
// =============================================================================
