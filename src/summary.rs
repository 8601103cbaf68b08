// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

use log::warn;

use crate::address::Address;
use crate::value::{Value, ValueMap};

/// The metadata the server attaches to the end of a result stream, obtained
/// by fully consuming a cursor (see
/// [`ResultCursor::consume()`](crate::ResultCursor::consume)).
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Summary {
    pub server: ServerInfo,
    pub database: Option<String>,
    pub query_type: Option<QueryType>,
    pub counters: UpdateCounters,
    /// Milliseconds until the server had the result available.
    pub available_after_ms: Option<i64>,
    /// Milliseconds the server took to stream the result out.
    pub consumed_after_ms: Option<i64>,
}

impl Summary {
    pub(crate) fn new(server: ServerInfo) -> Self {
        Self {
            server,
            database: None,
            query_type: None,
            counters: UpdateCounters::default(),
            available_after_ms: None,
            consumed_after_ms: None,
        }
    }

    pub(crate) fn absorb_run_meta(&mut self, meta: &mut ValueMap) {
        self.available_after_ms = meta.remove("t_first").and_then(|v| v.as_int());
    }

    pub(crate) fn absorb_final_meta(&mut self, meta: &mut ValueMap) {
        self.consumed_after_ms = meta.remove("t_last").and_then(|v| v.as_int());
        if let Some(db) = meta.remove("db").and_then(Value::into_string) {
            self.database = Some(db);
        }
        if let Some(kind) = meta.remove("type") {
            self.query_type = match kind.as_str() {
                Some("r") => Some(QueryType::Read),
                Some("w") => Some(QueryType::Write),
                Some("rw") => Some(QueryType::ReadWrite),
                Some("s") => Some(QueryType::Schema),
                other => {
                    warn!("server reported an unknown query type {other:?}");
                    None
                }
            };
        }
        if let Some(Value::Map(stats)) = meta.remove("stats") {
            self.counters = UpdateCounters::from_stats(stats);
        }
    }
}

/// The server a result came from.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ServerInfo {
    pub address: Address,
    pub agent: String,
    pub protocol_version: (u8, u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Read,
    Write,
    ReadWrite,
    Schema,
}

/// Write statistics from the `stats` entry of the terminal metadata.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct UpdateCounters {
    /// graph entities created and removed
    pub nodes_created: i64,
    pub nodes_deleted: i64,
    pub relationships_created: i64,
    pub relationships_deleted: i64,
    pub properties_set: i64,
    /// label changes
    pub labels_added: i64,
    pub labels_removed: i64,
    /// schema changes
    pub indexes_added: i64,
    pub indexes_removed: i64,
    pub constraints_added: i64,
    pub constraints_removed: i64,
    /// updates against the `system` database
    pub system_updates: i64,
    /// whether the query changed anything at all
    pub contains_updates: bool,
    pub contains_system_updates: bool,
}

impl UpdateCounters {
    fn from_stats(stats: ValueMap) -> Self {
        let mut counters = UpdateCounters::default();
        let mut contains_updates = None;
        let mut contains_system_updates = None;
        for (key, value) in stats {
            let slot = match key.as_str() {
                "nodes-created" => &mut counters.nodes_created,
                "nodes-deleted" => &mut counters.nodes_deleted,
                "relationships-created" => &mut counters.relationships_created,
                "relationships-deleted" => &mut counters.relationships_deleted,
                "properties-set" => &mut counters.properties_set,
                "labels-added" => &mut counters.labels_added,
                "labels-removed" => &mut counters.labels_removed,
                "indexes-added" => &mut counters.indexes_added,
                "indexes-removed" => &mut counters.indexes_removed,
                "constraints-added" => &mut counters.constraints_added,
                "constraints-removed" => &mut counters.constraints_removed,
                "system-updates" => &mut counters.system_updates,
                "contains-updates" => {
                    contains_updates = value.as_bool();
                    continue;
                }
                "contains-system-updates" => {
                    contains_system_updates = value.as_bool();
                    continue;
                }
                _ => continue,
            };
            *slot = value.as_int().unwrap_or_default();
        }
        counters.contains_updates = contains_updates.unwrap_or_else(|| {
            counters.nodes_created > 0
                || counters.nodes_deleted > 0
                || counters.relationships_created > 0
                || counters.relationships_deleted > 0
                || counters.properties_set > 0
                || counters.labels_added > 0
                || counters.labels_removed > 0
                || counters.indexes_added > 0
                || counters.indexes_removed > 0
                || counters.constraints_added > 0
                || counters.constraints_removed > 0
        });
        counters.contains_system_updates =
            contains_system_updates.unwrap_or(counters.system_updates > 0);
        counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_map;

    fn summary() -> Summary {
        Summary::new(ServerInfo {
            address: Address::new("localhost", 7687),
            agent: String::from("Neo4j/4.4.0"),
            protocol_version: (4, 4),
        })
    }

    #[test]
    fn final_meta_fills_the_summary() {
        let mut summary = summary();
        let mut meta = value_map! {
            "t_last" => 12,
            "type" => "w",
            "db" => "movies",
            "stats" => value_map! {
                "nodes-created" => 2,
                "properties-set" => 5,
            },
        };
        summary.absorb_final_meta(&mut meta);
        assert_eq!(summary.consumed_after_ms, Some(12));
        assert_eq!(summary.query_type, Some(QueryType::Write));
        assert_eq!(summary.database.as_deref(), Some("movies"));
        assert_eq!(summary.counters.nodes_created, 2);
        assert_eq!(summary.counters.properties_set, 5);
        assert_eq!(summary.counters.nodes_deleted, 0);
        assert!(summary.counters.contains_updates);
        assert!(!summary.counters.contains_system_updates);
    }

    #[test]
    fn run_meta_contributes_timing() {
        let mut summary = summary();
        let mut meta = value_map! { "t_first" => 3 };
        summary.absorb_run_meta(&mut meta);
        assert_eq!(summary.available_after_ms, Some(3));
    }

    #[test]
    fn explicit_contains_updates_wins_over_the_heuristic() {
        let mut summary = summary();
        let mut meta = value_map! {
            "type" => "r",
            "stats" => value_map! { "contains-updates" => false },
        };
        summary.absorb_final_meta(&mut meta);
        assert!(!summary.counters.contains_updates);
        assert_eq!(summary.query_type, Some(QueryType::Read));
    }
}
