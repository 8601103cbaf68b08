// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

use crate::bookmarks::Bookmarks;
use crate::cursor::{ResultCursor, StreamCore};
use crate::driver::{AccessMode, SessionDefaults};
use crate::errors::Result;
use crate::pool::{CheckoutRequest, Pool};
use crate::protocol::messages::{Request, TxContext};
use crate::retry;
use crate::statement::Statement;
use crate::transaction::Transaction;

/// Client-side aggregation of configuration, bookmarks, and one transaction
/// at a time.
///
/// Sessions are cheap; create one per unit of work
/// (see [`Driver::session()`](crate::Driver::session)). Within a session,
/// transactions are causally chained: each one reads at least what the
/// previous one committed, because the previous bookmark is forwarded
/// automatically. Across sessions, pass [`Session::last_bookmarks()`] along
/// explicitly.
///
/// Three ways to run work:
///  * [`Session::run()`] — one auto-commit statement, returning a lazy
///    cursor.
///  * [`Session::begin_transaction()`] — an explicit transaction under the
///    caller's control.
///  * [`Session::read_transaction()`] / [`Session::write_transaction()`] —
///    managed transactions, retried on transient failures per the driver's
///    retry configuration.
#[derive(Debug)]
pub struct Session<'d> {
    pool: &'d Pool,
    defaults: &'d SessionDefaults,
    database: Option<String>,
    fetch_size: i64,
    access_mode: AccessMode,
    chain: Bookmarks,
}

impl<'d> Session<'d> {
    pub(crate) fn new(config: SessionConfig, pool: &'d Pool, defaults: &'d SessionDefaults) -> Self {
        Self {
            database: config.database.or_else(|| defaults.database.clone()),
            fetch_size: config.fetch_size.unwrap_or(defaults.fetch_size),
            access_mode: config.access_mode.unwrap_or(AccessMode::Write),
            chain: config.bookmarks.unwrap_or_default(),
            pool,
            defaults,
        }
    }

    /// Runs one statement in an auto-commit transaction.
    ///
    /// The server manages the transaction; it is only guaranteed to be
    /// committed once the returned cursor has been fully consumed.
    pub fn run(&mut self, statement: impl Into<Statement>) -> Result<ResultCursor<'_>> {
        self.run_with_mode(statement.into(), self.access_mode)
    }

    fn run_with_mode(&mut self, statement: Statement, mode: AccessMode) -> Result<ResultCursor<'_>> {
        let deadline = self.pool.acquisition_deadline();
        let mut guard = self.pool.checkout(CheckoutRequest {
            mode,
            database: self.database.as_deref(),
            bookmarks: &self.chain,
            deadline,
        })?;
        {
            let metadata = statement.metadata();
            let scope = TxContext {
                bookmarks: &self.chain,
                mode,
                db: self.database.as_deref(),
                timeout: statement.timeout(),
                metadata: (!metadata.is_empty()).then_some(metadata),
            };
            let connection = guard.connection();
            connection.send(&Request::Run {
                statement: &statement,
                scope: Some(scope),
            })?;
            connection.send(&Request::Pull {
                n: self.fetch_size,
                qid: -1,
            })?;
            connection.flush(None)?;
        }
        let run_meta = match guard.connection().recv_success(None) {
            Ok(meta) => meta,
            Err(error) => {
                guard.flag(&error);
                return Err(error);
            }
        };
        let server = guard.connection().server_info();
        let core = StreamCore::start(run_meta, self.fetch_size, server)?;
        Ok(ResultCursor::new(guard, core, &mut self.chain))
    }

    /// Starts an explicit transaction.
    ///
    /// The BEGIN is queued and goes out together with the transaction's
    /// first statement.
    pub fn begin_transaction(&mut self) -> Result<Transaction<'_>> {
        self.begin_with_mode(self.access_mode)
    }

    fn begin_with_mode(&mut self, mode: AccessMode) -> Result<Transaction<'_>> {
        let deadline = self.pool.acquisition_deadline();
        let mut guard = self.pool.checkout(CheckoutRequest {
            mode,
            database: self.database.as_deref(),
            bookmarks: &self.chain,
            deadline,
        })?;
        {
            let context = TxContext {
                bookmarks: &self.chain,
                mode,
                db: self.database.as_deref(),
                timeout: None,
                metadata: None,
            };
            guard.connection().send(&Request::Begin { context })?;
        }
        Ok(Transaction::new(guard, &mut self.chain, self.fetch_size))
    }

    /// Runs `work` in a managed transaction against a reader.
    ///
    /// The transaction is committed when `work` returns `Ok`; on retryable
    /// failures (connection loss, leader switches, transient server errors)
    /// the whole function is run again, with pauses per the driver's retry
    /// configuration. `work` must therefore be safe to repeat.
    pub fn read_transaction<R>(
        &mut self,
        work: impl FnMut(&mut Transaction) -> Result<R>,
    ) -> Result<R> {
        self.managed(AccessMode::Read, work)
    }

    /// Like [`Session::read_transaction()`], but routed to a writer.
    pub fn write_transaction<R>(
        &mut self,
        work: impl FnMut(&mut Transaction) -> Result<R>,
    ) -> Result<R> {
        self.managed(AccessMode::Write, work)
    }

    fn managed<R>(
        &mut self,
        mode: AccessMode,
        mut work: impl FnMut(&mut Transaction) -> Result<R>,
    ) -> Result<R> {
        let policy = self.defaults.retry;
        retry::retry_with(&policy, || {
            let mut tx = self.begin_with_mode(mode)?;
            let value = work(&mut tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    /// The bookmarks the session would feed into its next transaction:
    /// either what it was configured with or those of the last finished
    /// transaction. Pass them to another session to causally chain the two.
    pub fn last_bookmarks(&self) -> &Bookmarks {
        &self.chain
    }
}

/// Per-session configuration; everything not set here falls back to the
/// driver's defaults.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    database: Option<String>,
    bookmarks: Option<Bookmarks>,
    fetch_size: Option<i64>,
    access_mode: Option<AccessMode>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the database when you know it; in a cluster this spares the
    /// round trips for resolving the default database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Starts the session's causal chain from earlier work.
    pub fn with_bookmarks(mut self, bookmarks: Bookmarks) -> Self {
        self.bookmarks = Some(bookmarks);
        self
    }

    /// Records per PULL batch; `-1` fetches whole results in one batch.
    pub fn with_fetch_size(mut self, fetch_size: i64) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }

    /// The access mode used by [`Session::run()`] and
    /// [`Session::begin_transaction()`]. Defaults to [`AccessMode::Write`].
    pub fn with_access_mode(mut self, access_mode: AccessMode) -> Self {
        self.access_mode = Some(access_mode);
        self
    }
}
