// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::time::Duration;

use crate::value::Value;

/// A piece of Cypher plus everything that travels with it: parameters,
/// transaction metadata, and an optional server-side timeout.
///
/// Always prefer parameters over string interpolation: the server can cache
/// the query plan, and parameters cannot cause injection.
///
/// ```
/// use neo4j_client::{value_map, Statement};
///
/// let statement = Statement::new("CREATE (p:Person {name: $name})")
///     .with_parameters(value_map! { "name" => "Alice" });
/// ```
#[derive(Debug, Clone)]
pub struct Statement {
    text: String,
    parameters: HashMap<String, Value>,
    metadata: HashMap<String, Value>,
    timeout: Option<Duration>,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: HashMap::new(),
            metadata: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Metadata shows up in the server's `query.log` and in
    /// `SHOW TRANSACTIONS YIELD *`. Only honoured on auto-commit runs; an
    /// explicit transaction sets its metadata at BEGIN.
    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Ask the server to kill the transaction after this long. Enforced
    /// server-side; only honoured on auto-commit runs.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    pub(crate) fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl From<&str> for Statement {
    fn from(text: &str) -> Self {
        Statement::new(text)
    }
}

impl From<String> for Statement {
    fn from(text: String) -> Self {
        Statement::new(text)
    }
}
