// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use crate::value::Value;

/// The credentials presented to the server as part of HELLO.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum AuthToken {
    /// No authentication (servers with auth disabled).
    None,
    Basic {
        username: String,
        password: String,
        realm: Option<String>,
    },
    /// A base64 encoded token, e.g., from an SSO provider.
    Bearer { token: String },
    /// A base64 encoded kerberos ticket.
    Kerberos { ticket: String },
    /// Escape hatch for server-side auth plugins.
    Custom {
        scheme: String,
        principal: Option<String>,
        credentials: Option<String>,
        realm: Option<String>,
        parameters: HashMap<String, Value>,
    },
}

impl AuthToken {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: None,
        }
    }

    pub fn basic_with_realm(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: Some(realm.into()),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    pub fn kerberos(ticket: impl Into<String>) -> Self {
        Self::Kerberos {
            ticket: ticket.into(),
        }
    }

    pub fn custom(
        scheme: impl Into<String>,
        principal: Option<String>,
        credentials: Option<String>,
        realm: Option<String>,
        parameters: HashMap<String, Value>,
    ) -> Self {
        Self::Custom {
            scheme: scheme.into(),
            principal,
            credentials,
            realm,
            parameters,
        }
    }

    pub(crate) fn scheme(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::Kerberos { .. } => "kerberos",
            Self::Custom { scheme, .. } => scheme,
        }
    }

    /// The entries this token contributes to the HELLO extras.
    pub(crate) fn hello_entries(&self) -> Vec<(&'static str, Value)> {
        let mut entries = Vec::with_capacity(4);
        match self {
            Self::None => {}
            Self::Basic {
                username,
                password,
                realm,
            } => {
                entries.push(("scheme", Value::from("basic")));
                entries.push(("principal", Value::from(username.as_str())));
                entries.push(("credentials", Value::from(password.as_str())));
                if let Some(realm) = realm {
                    entries.push(("realm", Value::from(realm.as_str())));
                }
            }
            Self::Bearer { token } => {
                entries.push(("scheme", Value::from("bearer")));
                entries.push(("credentials", Value::from(token.as_str())));
            }
            Self::Kerberos { ticket } => {
                entries.push(("scheme", Value::from("kerberos")));
                entries.push(("principal", Value::from("")));
                entries.push(("credentials", Value::from(ticket.as_str())));
            }
            Self::Custom {
                scheme,
                principal,
                credentials,
                realm,
                parameters,
            } => {
                entries.push(("scheme", Value::from(scheme.as_str())));
                if let Some(principal) = principal {
                    entries.push(("principal", Value::from(principal.as_str())));
                }
                if let Some(credentials) = credentials {
                    entries.push(("credentials", Value::from(credentials.as_str())));
                }
                if let Some(realm) = realm {
                    entries.push(("realm", Value::from(realm.as_str())));
                }
                if !parameters.is_empty() {
                    entries.push(("parameters", Value::Map(parameters.clone())));
                }
            }
        }
        entries
    }
}

impl Default for AuthToken {
    fn default() -> Self {
        Self::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry<'a>(entries: &'a [(&str, Value)], key: &str) -> Option<&'a Value> {
        entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    #[test]
    fn basic_auth_entries() {
        let entries = AuthToken::basic("neo4j", "secret").hello_entries();
        assert_eq!(entry(&entries, "scheme"), Some(&Value::from("basic")));
        assert_eq!(entry(&entries, "principal"), Some(&Value::from("neo4j")));
        assert_eq!(entry(&entries, "credentials"), Some(&Value::from("secret")));
        assert_eq!(entry(&entries, "realm"), None);
    }

    #[test]
    fn bearer_auth_has_no_principal() {
        let entries = AuthToken::bearer("dG9rZW4=").hello_entries();
        assert_eq!(entry(&entries, "scheme"), Some(&Value::from("bearer")));
        assert_eq!(entry(&entries, "principal"), None);
    }

    #[test]
    fn no_auth_sends_nothing() {
        assert!(AuthToken::None.hello_entries().is_empty());
    }

    #[test]
    fn custom_auth_skips_absent_parts() {
        let entries = AuthToken::custom("plugin", None, None, None, HashMap::new())
            .hello_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entry(&entries, "scheme"), Some(&Value::from("plugin")));
    }
}
