// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Instant;

use log::debug;
use parking_lot::{Condvar, Mutex};

use super::PoolConfig;
use crate::address::Address;
use crate::errors::{Error, Result};
use crate::protocol::connection::{self, ConnectOptions, Connection};
use crate::protocol::messages::Request;

/// A bounded pool of connections to one server.
///
/// `occupied + idle.len()` never exceeds `max_pool_size`; `occupied` also
/// counts connections that are still being opened, so the bound holds while
/// dialing. Waiters queue on the condvar until a slot frees up or their
/// deadline passes.
#[derive(Debug)]
pub(crate) struct ServerPool {
    address: Arc<Address>,
    config: Arc<PoolConfig>,
    slots: Mutex<Slots>,
    vacancy: Condvar,
}

#[derive(Debug)]
struct Slots {
    idle: Vec<Connection>,
    occupied: usize,
}

enum Claim {
    Existing(Connection),
    Vacancy,
}

impl ServerPool {
    pub(crate) fn new(address: Arc<Address>, config: Arc<PoolConfig>) -> Self {
        Self {
            address,
            config,
            slots: Mutex::new(Slots {
                idle: Vec::new(),
                occupied: 0,
            }),
            vacancy: Condvar::new(),
        }
    }

    pub(crate) fn checkout(&self, deadline: Option<Instant>) -> Result<Connection> {
        loop {
            match self.claim(deadline)? {
                Claim::Existing(mut connection) => {
                    if self.revive(&mut connection, deadline) {
                        return Ok(connection);
                    }
                    // beyond saving; give the slot back and look again
                    drop(connection);
                    self.vacate();
                }
                Claim::Vacancy => match self.dial(deadline) {
                    Ok(connection) => return Ok(connection),
                    Err(error) => {
                        self.vacate();
                        return Err(error);
                    }
                },
            }
        }
    }

    fn claim(&self, deadline: Option<Instant>) -> Result<Claim> {
        let mut slots = self.slots.lock();
        loop {
            if let Some(connection) = slots.idle.pop() {
                slots.occupied += 1;
                return Ok(Claim::Existing(connection));
            }
            if slots.occupied < self.config.max_pool_size {
                slots.occupied += 1;
                return Ok(Claim::Vacancy);
            }
            match deadline {
                None => self.vacancy.wait(&mut slots),
                Some(deadline) => {
                    if self.vacancy.wait_until(&mut slots, deadline).timed_out() {
                        return Err(Error::acquire_timeout(
                            "waiting for a free slot in the connection pool",
                        ));
                    }
                }
            }
        }
    }

    /// Checks a pooled connection before handing it out again: any left-over
    /// stream is drained, and connections that sat idle past the liveness
    /// threshold get probed with a RESET round trip. `false` means the
    /// connection is unusable and should be dropped.
    fn revive(&self, connection: &mut Connection, deadline: Option<Instant>) -> bool {
        if connection.is_defunct() {
            return false;
        }
        if connection.needs_tidy() {
            if let Err(error) = connection.tidy(deadline) {
                debug!("[{}] dropping connection, drain failed: {error}", self.address);
                return false;
            }
            return true;
        }
        if let Some(threshold) = self.config.liveness_timeout {
            if connection.idled_longer_than(threshold) {
                if let Err(error) = connection.ping(deadline) {
                    debug!(
                        "[{}] dropping connection, liveness probe failed: {error}",
                        self.address
                    );
                    return false;
                }
            }
        }
        true
    }

    fn dial(&self, deadline: Option<Instant>) -> Result<Connection> {
        let mut connection = connection::open(
            Arc::clone(&self.address),
            ConnectOptions {
                connect_timeout: self.config.connect_timeout,
                tls: self.config.tls.as_ref(),
                deadline,
            },
        )?;
        connection.send(&Request::Hello {
            user_agent: &self.config.user_agent,
            auth: &self.config.auth,
            routing: self.config.routing_context.as_ref(),
        })?;
        connection.flush(deadline)?;
        connection.recv_success(deadline)?;
        Ok(connection)
    }

    fn vacate(&self) {
        self.slots.lock().occupied -= 1;
        self.vacancy.notify_one();
    }

    /// Returns a borrowed connection. Any state the consumer left behind is
    /// cleaned off first (outside the lock) so the next consumer starts from
    /// READY; unusable connections are closed and only their slot returns.
    pub(crate) fn checkin(&self, mut connection: Connection) {
        if connection.needs_tidy() && connection.tidy(None).is_err() {
            debug!("[{}] closing connection returned in a bad state", self.address);
        }
        let connection = (!connection.is_defunct()).then_some(connection);
        {
            let mut slots = self.slots.lock();
            slots.occupied -= 1;
            if let Some(connection) = connection {
                slots.idle.push(connection);
            }
        }
        self.vacancy.notify_one();
    }
}
