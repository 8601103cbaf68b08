// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

use crate::bookmarks::Bookmarks;
use crate::cursor::{StreamCore, TransactionCursor};
use crate::errors::{Error, Result};
use crate::pool::PoolGuard;
use crate::protocol::messages::Request;
use crate::statement::Statement;
use crate::value::Value;

/// An explicit transaction.
///
/// Created through
/// [`Session::begin_transaction()`](crate::Session::begin_transaction). All
/// statements run on the one connection the transaction holds; the BEGIN is
/// not sent on its own but pipelined with the first statement. Dropping a
/// live transaction rolls it back (best effort, errors are swallowed —
/// prefer calling [`Transaction::rollback()`]).
#[derive(Debug)]
pub struct Transaction<'s> {
    guard: PoolGuard,
    chain: &'s mut Bookmarks,
    fetch_size: i64,
    /// the BEGIN has been acknowledged
    begun: bool,
    /// a statement failed; the server already tore the transaction down
    broken: bool,
    finished: bool,
}

impl<'s> Transaction<'s> {
    /// Expects the BEGIN to be queued on the connection already.
    pub(crate) fn new(guard: PoolGuard, chain: &'s mut Bookmarks, fetch_size: i64) -> Self {
        Self {
            guard,
            chain,
            fetch_size,
            begun: false,
            broken: false,
            finished: false,
        }
    }

    /// Runs a statement inside this transaction.
    ///
    /// The returned cursor borrows the transaction; it must go out of scope
    /// before the next statement or the commit (one live stream per
    /// connection).
    pub fn run(&mut self, statement: impl Into<Statement>) -> Result<TransactionCursor<'_>> {
        if self.broken {
            return Err(Error::config(
                "this transaction has already failed; roll it back and start a new one",
            ));
        }
        let statement = statement.into();
        {
            let connection = self.guard.connection();
            connection.send(&Request::Run {
                statement: &statement,
                scope: None,
            })?;
            connection.send(&Request::Pull {
                n: self.fetch_size,
                qid: -1,
            })?;
            connection.flush(None)?;
        }
        self.await_begin()?;
        let run_meta = match self.guard.connection().recv_success(None) {
            Ok(meta) => meta,
            Err(error) => {
                self.guard.flag(&error);
                self.broken = true;
                return Err(error);
            }
        };
        let server = self.guard.connection().server_info();
        let core = StreamCore::start(run_meta, self.fetch_size, server)?;
        Ok(TransactionCursor::new(&mut self.guard, core))
    }

    /// Commits and consumes the transaction; the server's bookmark extends
    /// the session's causal chain.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        if self.broken {
            return Err(Error::config(
                "cannot commit a transaction that has already failed",
            ));
        }
        {
            let connection = self.guard.connection();
            connection.send(&Request::Commit)?;
            // from here on a lost connection leaves the outcome unknowable
            connection.flush(None).map_err(Error::during_commit)?;
        }
        self.await_begin().map_err(Error::during_commit)?;
        let mut meta = self
            .guard
            .connection()
            .recv_success(None)
            .map_err(Error::during_commit)?;
        if let Some(Value::String(token)) = meta.remove("bookmark") {
            self.chain.rebase(token);
        }
        Ok(())
    }

    /// Rolls back and consumes the transaction.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        if self.broken {
            // the server already discarded the transaction
            return Ok(());
        }
        {
            let connection = self.guard.connection();
            connection.send(&Request::Rollback)?;
            connection.flush(None)?;
        }
        self.await_begin()?;
        self.guard.connection().recv_success(None)?;
        Ok(())
    }

    /// Collects the BEGIN acknowledgement the first time anything else needs
    /// an answer from the server.
    fn await_begin(&mut self) -> Result<()> {
        if self.begun {
            return Ok(());
        }
        match self.guard.connection().recv_success(None) {
            Ok(_) => {
                self.begun = true;
                Ok(())
            }
            Err(error) => {
                self.guard.flag(&error);
                self.broken = true;
                Err(error)
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished || self.broken {
            return;
        }
        let connection = self.guard.connection();
        if connection.is_defunct() {
            return;
        }
        // a live transaction that goes out of scope is rolled back
        let _ = connection
            .send(&Request::Rollback)
            .and_then(|_| connection.flush(None))
            .and_then(|_| connection.settle(None));
    }
}
