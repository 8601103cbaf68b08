// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

use crate::bookmarks::Bookmarks;
use crate::config::{ConnectionConfig, DriverConfig};
use crate::errors::Result;
use crate::pool::{CheckoutRequest, Pool, PoolConfig};
use crate::retry::ExponentialBackoff;
use crate::session::{Session, SessionConfig};

/// The entry point of the crate: owns the connection pool and spawns
/// [`Session`]s.
///
/// One driver per database URI is enough for a whole application; drivers
/// are not pooled themselves.
#[derive(Debug)]
pub struct Driver {
    pool: Pool,
    defaults: SessionDefaults,
}

/// The slice of the driver configuration sessions read at runtime.
#[derive(Debug)]
pub(crate) struct SessionDefaults {
    pub(crate) fetch_size: i64,
    pub(crate) database: Option<String>,
    pub(crate) retry: ExponentialBackoff,
}

impl Driver {
    /// Builds a driver from where to connect ([`ConnectionConfig`]) and how
    /// to behave ([`DriverConfig`]).
    ///
    /// Fails when the TLS policy cannot be realised (unreadable CA bundles,
    /// missing crate feature for `+ssc`). Credentials embedded in the URI
    /// take precedence over [`DriverConfig::with_auth()`].
    pub fn new(connection: ConnectionConfig, config: DriverConfig) -> Result<Self> {
        let tls = connection.tls.client_config()?;
        let auth = connection.auth.unwrap_or(config.auth);
        let pool_config = PoolConfig {
            user_agent: config.user_agent,
            auth,
            routing_context: connection.routing_context,
            tls,
            max_pool_size: config.max_pool_size,
            acquisition_timeout: config.acquisition_timeout,
            connect_timeout: config.connect_timeout,
            liveness_timeout: config.liveness_timeout,
        };
        Ok(Self {
            pool: Pool::new(connection.address, pool_config),
            defaults: SessionDefaults {
                fetch_size: config.fetch_size,
                database: connection.database,
                retry: config.retry,
            },
        })
    }

    /// Spawns a session. Sessions are cheap; use one per unit of work.
    pub fn session(&self, config: SessionConfig) -> Session<'_> {
        Session::new(config, &self.pool, &self.defaults)
    }

    /// Acquires (and immediately releases) a connection, driving a routing
    /// table fetch on routed drivers. Useful as a fail-fast startup check.
    pub fn verify_connectivity(&self) -> Result<()> {
        let bookmarks = Bookmarks::default();
        let guard = self.pool.checkout(CheckoutRequest {
            mode: AccessMode::Read,
            database: self.defaults.database.as_deref(),
            bookmarks: &bookmarks,
            deadline: self.pool.acquisition_deadline(),
        })?;
        drop(guard);
        Ok(())
    }
}

/// Whether work should go to a cluster member that can write, or whether a
/// read replica suffices.
///
/// Against a single instance both end up on the same server, but the mode
/// still travels with the transaction so the server can reject writes where
/// only reads were announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}
