// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::Mutex;

use super::server_pool::ServerPool;
use super::{CheckoutRequest, PoolConfig};
use crate::address::Address;
use crate::driver::AccessMode;
use crate::errors::{Error, Result};
use crate::protocol::connection::Connection;
use crate::protocol::messages::{take_field_names, Request, Response, TxContext};
use crate::protocol::version::Version;
use crate::statement::Statement;
use crate::value::{Value, ValueMap};

/// One cluster view, grouped by role, with its expiry.
#[derive(Debug)]
pub(crate) struct RoutingTable {
    routers: Vec<Arc<Address>>,
    readers: Vec<Arc<Address>>,
    writers: Vec<Arc<Address>>,
    fetched_at: Instant,
    ttl: Duration,
    /// rotating cursor so successive acquisitions spread over the role's
    /// servers
    rotation: AtomicUsize,
}

impl RoutingTable {
    /// Parses the `{ttl, servers}` body of a routing table, as returned in
    /// the `rt` entry of a ROUTE SUCCESS or as the record of the routing
    /// table procedure.
    pub(crate) fn parse(mut body: ValueMap) -> Result<Self> {
        let ttl = match body.remove("ttl") {
            Some(Value::Integer(seconds)) if seconds >= 0 => Duration::from_secs(seconds as u64),
            other => {
                return Err(Error::protocol(format!(
                    "routing table has no usable ttl: {other:?}"
                )))
            }
        };
        let Some(Value::List(servers)) = body.remove("servers") else {
            return Err(Error::protocol("routing table has no servers list"));
        };
        let mut table = Self {
            routers: Vec::new(),
            readers: Vec::new(),
            writers: Vec::new(),
            fetched_at: Instant::now(),
            ttl,
            rotation: AtomicUsize::new(0),
        };
        for server in servers {
            let Value::Map(mut entry) = server else {
                return Err(Error::protocol("routing table server entry is not a map"));
            };
            let role = entry
                .remove("role")
                .and_then(Value::into_string)
                .ok_or_else(|| Error::protocol("routing table server entry has no role"))?;
            let addresses = entry
                .remove("addresses")
                .and_then(Value::into_list)
                .ok_or_else(|| Error::protocol("routing table server entry has no addresses"))?
                .into_iter()
                .map(|address| {
                    address
                        .into_string()
                        .map(|raw| Arc::new(Address::parse(&raw)))
                        .ok_or_else(|| Error::protocol("routing table address is not a string"))
                })
                .collect::<Result<Vec<_>>>()?;
            match role.as_str() {
                "ROUTE" => table.routers = addresses,
                "READ" => table.readers = addresses,
                "WRITE" => table.writers = addresses,
                other => warn!("ignoring unknown routing role {other:?}"),
            }
        }
        Ok(table)
    }

    fn role(&self, mode: AccessMode) -> &[Arc<Address>] {
        match mode {
            AccessMode::Read => &self.readers,
            AccessMode::Write => &self.writers,
        }
    }

    /// A table is only worth keeping if another refresh could go through it
    /// and reads can be served.
    pub(crate) fn usable(&self) -> bool {
        !self.routers.is_empty() && !self.readers.is_empty()
    }

    pub(crate) fn is_fresh(&self, mode: AccessMode) -> bool {
        !self.routers.is_empty()
            && !self.role(mode).is_empty()
            && self.fetched_at.elapsed() < self.ttl
    }

    /// The role's servers, rotated one step further on every call.
    /// Single-instance deployments may advertise the writer only, so READ
    /// falls back to the writers when there are no dedicated readers.
    pub(crate) fn candidates(&self, mode: AccessMode) -> Vec<Arc<Address>> {
        let mut servers = self.role(mode);
        if servers.is_empty() && mode == AccessMode::Read {
            servers = &self.writers;
        }
        if servers.is_empty() {
            return Vec::new();
        }
        let start = self.rotation.fetch_add(1, Ordering::Relaxed) % servers.len();
        let mut rotated = Vec::with_capacity(servers.len());
        rotated.extend_from_slice(&servers[start..]);
        rotated.extend_from_slice(&servers[..start]);
        rotated
    }

    pub(crate) fn forget(&mut self, address: &Address) {
        self.routers.retain(|known| **known != *address);
        self.readers.retain(|known| **known != *address);
        self.forget_writer(address);
    }

    pub(crate) fn forget_writer(&mut self, address: &Address) {
        self.writers.retain(|known| **known != *address);
    }

    fn all_addresses(&self) -> impl Iterator<Item = &Arc<Address>> {
        self.routers
            .iter()
            .chain(self.readers.iter())
            .chain(self.writers.iter())
    }
}

/// Serves checkouts by cluster role, refreshing the per-database routing
/// tables when they expire.
#[derive(Debug)]
pub(crate) struct RoutedPool {
    initial_router: Arc<Address>,
    config: Arc<PoolConfig>,
    servers: Mutex<HashMap<Arc<Address>, Arc<ServerPool>>>,
    tables: Mutex<HashMap<Option<String>, RoutingTable>>,
}

impl RoutedPool {
    pub(crate) fn new(initial_router: Arc<Address>, config: Arc<PoolConfig>) -> Self {
        Self {
            initial_router,
            config,
            servers: Mutex::new(HashMap::new()),
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn checkout(
        &self,
        request: &CheckoutRequest<'_>,
    ) -> Result<(Arc<ServerPool>, Connection)> {
        let candidates = self.fresh_candidates(request)?;
        let mut last_error = None;
        for address in candidates {
            let pool = self.server_pool(&address);
            match pool.checkout(request.deadline) {
                Ok(connection) => return Ok((pool, connection)),
                Err(error @ Error::Connection { .. }) => {
                    debug!("dropping unreachable server {address} from the routing tables");
                    self.forget_server(&address);
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_error
            .unwrap_or_else(|| Error::connection("no servers left to serve this request")))
    }

    /// Servers of the requested role, from a table that is still within its
    /// ttl; expired or missing tables are re-fetched first.
    fn fresh_candidates(&self, request: &CheckoutRequest<'_>) -> Result<Vec<Arc<Address>>> {
        let key = request.database.map(str::to_owned);
        {
            let tables = self.tables.lock();
            if let Some(table) = tables.get(&key) {
                if table.is_fresh(request.mode) {
                    return Ok(table.candidates(request.mode));
                }
            }
        }
        // fetch outside the lock; when refreshes race, the last table stored
        // wins, which is harmless
        let table = self.fetch_table(&key, request)?;
        let candidates = table.candidates(request.mode);
        self.tables.lock().insert(key, table);
        self.prune_server_pools();
        if candidates.is_empty() {
            return Err(Error::connection(format!(
                "the cluster currently has no {:?} server for this database",
                request.mode
            )));
        }
        Ok(candidates)
    }

    fn fetch_table(
        &self,
        key: &Option<String>,
        request: &CheckoutRequest<'_>,
    ) -> Result<RoutingTable> {
        let mut routers: Vec<Arc<Address>> = {
            let tables = self.tables.lock();
            tables
                .get(key)
                .map(|table| table.routers.clone())
                .unwrap_or_default()
        };
        routers.retain(|router| *router != self.initial_router);
        routers.push(Arc::clone(&self.initial_router));

        let mut last_error = None;
        for router in routers {
            let pool = self.server_pool(&router);
            let attempt = pool.checkout(request.deadline).and_then(|mut connection| {
                let outcome = self.request_table(&mut connection, request);
                pool.checkin(connection);
                outcome
            });
            match attempt {
                Ok(table) if table.usable() => {
                    debug!(
                        "router {router} advertised {} router(s), {} reader(s), {} writer(s)",
                        table.routers.len(),
                        table.readers.len(),
                        table.writers.len()
                    );
                    return Ok(table);
                }
                Ok(_) => {
                    debug!("router {router} advertised an unusable routing table");
                    self.forget_server(&router);
                    last_error = Some(Error::connection("received an unusable routing table"));
                }
                Err(error) if error.fatal_for_discovery() => return Err(error),
                Err(error) => {
                    debug!("router {router} did not yield a routing table: {error}");
                    self.forget_server(&router);
                    last_error = Some(error);
                }
            }
        }
        Err(Error::connection(format!(
            "could not fetch a routing table from any known router{}",
            last_error
                .map(|error| format!("; last error: {error}"))
                .unwrap_or_default()
        )))
    }

    fn request_table(
        &self,
        connection: &mut Connection,
        request: &CheckoutRequest<'_>,
    ) -> Result<RoutingTable> {
        let routing = self
            .config
            .routing_context
            .as_ref()
            .expect("a routed pool always has a routing context");
        if connection.version() >= Version::V4_3 {
            connection.send(&Request::Route {
                routing,
                bookmarks: request.bookmarks,
                db: request.database,
            })?;
            connection.flush(request.deadline)?;
            let mut meta = connection.recv_success(request.deadline)?;
            let Some(Value::Map(body)) = meta.remove("rt") else {
                return Err(Error::protocol("ROUTE reply carried no routing table"));
            };
            RoutingTable::parse(body)
        } else {
            self.table_via_procedure(connection, request, routing)
        }
    }

    /// Before 4.3 there is no ROUTE message; the cluster is asked through
    /// the routing table procedure instead, and the returned record is
    /// reshaped into the same `{ttl, servers}` body.
    fn table_via_procedure(
        &self,
        connection: &mut Connection,
        request: &CheckoutRequest<'_>,
        routing: &ValueMap,
    ) -> Result<RoutingTable> {
        let statement = Statement::new("CALL dbms.routing.getRoutingTable($context, $database)")
            .with_parameter("context", Value::Map(routing.clone()))
            .with_parameter(
                "database",
                request.database.map(Value::from).unwrap_or(Value::Null),
            );
        connection.send(&Request::Run {
            statement: &statement,
            scope: Some(TxContext {
                bookmarks: request.bookmarks,
                mode: AccessMode::Read,
                db: None,
                timeout: None,
                metadata: None,
            }),
        })?;
        connection.send(&Request::Pull { n: -1, qid: -1 })?;
        connection.flush(request.deadline)?;

        let mut run_meta = connection.recv_success(request.deadline)?;
        let columns = take_field_names(&mut run_meta)?;
        let mut row = None;
        loop {
            match connection.recv_response(request.deadline)? {
                Response::Record(values) => row = Some(values),
                Response::Success(_) => break,
                Response::Failure(error) => return Err(error.into()),
                Response::Ignored => {
                    return Err(Error::protocol("the routing procedure was ignored"))
                }
            }
        }
        let Some(row) = row else {
            return Err(Error::protocol("the routing procedure returned no record"));
        };
        if row.len() != columns.len() {
            return Err(Error::protocol(
                "the routing procedure record does not match its header",
            ));
        }
        let body: ValueMap = columns.into_iter().zip(row).collect();
        RoutingTable::parse(body)
    }

    fn server_pool(&self, address: &Arc<Address>) -> Arc<ServerPool> {
        let mut servers = self.servers.lock();
        Arc::clone(servers.entry(Arc::clone(address)).or_insert_with(|| {
            Arc::new(ServerPool::new(Arc::clone(address), Arc::clone(&self.config)))
        }))
    }

    pub(crate) fn forget_server(&self, address: &Address) {
        debug!("forgetting server {address}");
        {
            let mut tables = self.tables.lock();
            for table in tables.values_mut() {
                table.forget(address);
            }
        }
        self.servers.lock().remove(address);
    }

    pub(crate) fn forget_writer(&self, address: &Address) {
        debug!("forgetting writer {address}");
        let mut tables = self.tables.lock();
        for table in tables.values_mut() {
            table.forget_writer(address);
        }
    }

    /// Server pools for addresses no table mentions any more hold nothing
    /// but dead weight.
    fn prune_server_pools(&self) {
        let advertised: HashSet<Arc<Address>> = {
            let tables = self.tables.lock();
            tables
                .values()
                .flat_map(|table| table.all_addresses().map(Arc::clone))
                .collect()
        };
        self.servers
            .lock()
            .retain(|address, _| advertised.contains(address));
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn table_body(ttl: i64) -> ValueMap {
        fn entry(role: &str, addresses: &[&str]) -> Value {
            let mut map = ValueMap::new();
            map.insert("role".into(), Value::from(role));
            map.insert(
                "addresses".into(),
                Value::List(addresses.iter().map(|a| Value::from(*a)).collect()),
            );
            Value::Map(map)
        }

        let mut body = ValueMap::new();
        body.insert("ttl".into(), Value::Integer(ttl));
        body.insert(
            "servers".into(),
            Value::List(vec![
                entry("ROUTE", &["router-a:7687", "router-b:7687"]),
                entry("READ", &["reader-a:7687", "reader-b:7687"]),
                entry("WRITE", &["writer-a:7687"]),
            ]),
        );
        body
    }

    fn address(raw: &str) -> Arc<Address> {
        Arc::new(Address::parse(raw))
    }

    #[test]
    fn parses_roles_and_ttl() {
        let table = RoutingTable::parse(table_body(300)).unwrap();
        assert_eq!(table.routers, vec![address("router-a:7687"), address("router-b:7687")]);
        assert_eq!(table.readers.len(), 2);
        assert_eq!(table.writers, vec![address("writer-a:7687")]);
        assert!(table.usable());
    }

    #[rstest]
    #[case("ttl")]
    #[case("servers")]
    fn missing_parts_fail_the_parse(#[case] key: &str) {
        let mut body = table_body(300);
        body.remove(key);
        assert!(RoutingTable::parse(body).is_err());
    }

    #[test]
    fn negative_ttl_fails_the_parse() {
        assert!(RoutingTable::parse(table_body(-1)).is_err());
    }

    #[test]
    fn unknown_roles_are_skipped() {
        let mut body = table_body(300);
        let Some(Value::List(servers)) = body.get_mut("servers") else {
            panic!("servers vanished");
        };
        let mut extra = ValueMap::new();
        extra.insert("role".into(), Value::from("TERTIARY"));
        extra.insert("addresses".into(), Value::List(vec![Value::from("x:1")]));
        servers.push(Value::Map(extra));
        let table = RoutingTable::parse(body).unwrap();
        assert_eq!(table.routers.len(), 2);
    }

    #[test]
    fn freshness_honours_the_ttl() {
        assert!(RoutingTable::parse(table_body(3600))
            .unwrap()
            .is_fresh(AccessMode::Read));
        // a zero ttl expires the moment the table arrives
        assert!(!RoutingTable::parse(table_body(0))
            .unwrap()
            .is_fresh(AccessMode::Read));
    }

    #[test]
    fn losing_all_routers_expires_the_table() {
        let mut table = RoutingTable::parse(table_body(3600)).unwrap();
        table.forget(&address("router-a:7687"));
        assert!(table.is_fresh(AccessMode::Read));
        table.forget(&address("router-b:7687"));
        assert!(!table.is_fresh(AccessMode::Read));
    }

    #[test]
    fn losing_the_writer_only_expires_writes() {
        let mut table = RoutingTable::parse(table_body(3600)).unwrap();
        table.forget_writer(&address("writer-a:7687"));
        assert!(!table.is_fresh(AccessMode::Write));
        assert!(table.is_fresh(AccessMode::Read));
    }

    #[test]
    fn candidates_rotate_round_robin() {
        let table = RoutingTable::parse(table_body(3600)).unwrap();
        let first = table.candidates(AccessMode::Read);
        let second = table.candidates(AccessMode::Read);
        let third = table.candidates(AccessMode::Read);
        assert_eq!(first, vec![address("reader-a:7687"), address("reader-b:7687")]);
        assert_eq!(second, vec![address("reader-b:7687"), address("reader-a:7687")]);
        assert_eq!(third, first);
    }

    #[test]
    fn reads_fall_back_to_the_writer() {
        let mut table = RoutingTable::parse(table_body(3600)).unwrap();
        table.readers.clear();
        assert_eq!(
            table.candidates(AccessMode::Read),
            vec![address("writer-a:7687")]
        );
    }
}
