// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

//! Connection pooling: a bounded pool per server, and on top of that the
//! routed pool that picks servers from the cluster's routing tables.

mod routing;
mod server_pool;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::ClientConfig;

use crate::address::Address;
use crate::auth::AuthToken;
use crate::bookmarks::Bookmarks;
use crate::driver::AccessMode;
use crate::errors::{Error, Result};
use crate::protocol::connection::Connection;
use crate::value::ValueMap;
use routing::RoutedPool;
use server_pool::ServerPool;

#[derive(Debug)]
pub(crate) struct PoolConfig {
    pub(crate) user_agent: String,
    pub(crate) auth: AuthToken,
    /// `Some` makes this a routed driver; the map is the routing context
    /// forwarded to the cluster.
    pub(crate) routing_context: Option<ValueMap>,
    pub(crate) tls: Option<Arc<ClientConfig>>,
    pub(crate) max_pool_size: usize,
    pub(crate) acquisition_timeout: Option<Duration>,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) liveness_timeout: Option<Duration>,
}

impl PoolConfig {
    pub(crate) fn acquisition_deadline(&self) -> Option<Instant> {
        self.acquisition_timeout.map(|timeout| Instant::now() + timeout)
    }
}

/// What a session needs a connection for.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CheckoutRequest<'a> {
    pub(crate) mode: AccessMode,
    pub(crate) database: Option<&'a str>,
    pub(crate) bookmarks: &'a Bookmarks,
    pub(crate) deadline: Option<Instant>,
}

#[derive(Debug)]
pub(crate) struct Pool {
    config: Arc<PoolConfig>,
    flavor: Flavor,
}

#[derive(Debug)]
enum Flavor {
    Direct(Arc<ServerPool>),
    Routed(Arc<RoutedPool>),
}

impl Pool {
    pub(crate) fn new(address: Address, config: PoolConfig) -> Self {
        let config = Arc::new(config);
        let address = Arc::new(address);
        let flavor = match config.routing_context {
            None => Flavor::Direct(Arc::new(ServerPool::new(address, Arc::clone(&config)))),
            Some(_) => Flavor::Routed(Arc::new(RoutedPool::new(address, Arc::clone(&config)))),
        };
        Self { config, flavor }
    }

    pub(crate) fn acquisition_deadline(&self) -> Option<Instant> {
        self.config.acquisition_deadline()
    }

    pub(crate) fn checkout(&self, request: CheckoutRequest<'_>) -> Result<PoolGuard> {
        match &self.flavor {
            Flavor::Direct(pool) => {
                let connection = pool.checkout(request.deadline)?;
                Ok(PoolGuard::new(connection, Arc::clone(pool), None))
            }
            Flavor::Routed(routed) => {
                let (home, connection) = routed.checkout(&request)?;
                Ok(PoolGuard::new(connection, home, Some(Arc::clone(routed))))
            }
        }
    }
}

/// A connection on loan. The holder owns it exclusively; dropping the guard
/// hands it back (tidied up) to the pool it came from.
#[derive(Debug)]
pub(crate) struct PoolGuard {
    connection: Option<Connection>,
    home: Arc<ServerPool>,
    routed: Option<Arc<RoutedPool>>,
}

impl PoolGuard {
    fn new(connection: Connection, home: Arc<ServerPool>, routed: Option<Arc<RoutedPool>>) -> Self {
        Self {
            connection: Some(connection),
            home,
            routed,
        }
    }

    pub(crate) fn connection(&mut self) -> &mut Connection {
        self.connection
            .as_mut()
            .expect("guard holds a connection until dropped")
    }

    /// Routing bookkeeping for server errors the caller is about to surface:
    /// a leader switch or an unavailable database invalidates parts of the
    /// routing table.
    pub(crate) fn flag(&self, error: &Error) {
        let Some(routed) = &self.routed else { return };
        let Error::Server(server_error) = error else { return };
        let address = self
            .connection
            .as_ref()
            .expect("guard holds a connection until dropped")
            .address();
        if server_error.marks_server_unavailable() {
            routed.forget_server(address);
        } else if server_error.invalidates_writer() {
            routed.forget_writer(address);
        }
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        if connection.is_defunct() {
            if let Some(routed) = &self.routed {
                routed.forget_server(connection.address());
            }
        }
        self.home.checkin(connection);
    }
}
