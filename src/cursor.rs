// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

//! The demand-driven result cursor: records arrive in batches of the
//! configured fetch size, pulled only when iteration outruns the buffer.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::bookmarks::Bookmarks;
use crate::errors::{Error, Result};
use crate::pool::PoolGuard;
use crate::protocol::connection::Connection;
use crate::protocol::messages::{take_field_names, Request, Response};
use crate::record::Record;
use crate::summary::{ServerInfo, Summary};
use crate::value::{Value, ValueMap};

/// Where the stream stands, seen from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// records are still wanted
    Streaming,
    /// the rest of the stream is being thrown away server-side
    Draining,
    /// the terminal summary arrived
    Complete,
    /// transport failure or server FAILURE; nothing further will arrive
    Broken,
}

/// What the next outstanding batch summary will mean.
#[derive(Debug, Clone, Copy)]
enum BatchKind {
    /// an ordinary PULL or the closing DISCARD
    Fetch,
    /// a seek's whole-batch skip; on success the record indexing jumps to
    /// `base`
    Skip { base: usize },
}

/// The engine shared by the session-level and in-transaction cursors. It
/// owns the buffered records and all position/batch bookkeeping; the wrapper
/// types own (or borrow) the connection it drives.
#[derive(Debug)]
pub(crate) struct StreamCore {
    keys: Arc<[String]>,
    qid: i64,
    fetch_size: i64,
    buffer: VecDeque<Record>,
    /// index of the record at the front of `buffer`
    next_index: usize,
    /// index of the next record the consumer should see; records below it
    /// are dropped on the way out
    position: usize,
    /// how many batch-sized PULLs have been issued
    batches_requested: usize,
    /// outstanding batch summaries, oldest first
    expected: VecDeque<BatchKind>,
    phase: Phase,
    summary: Option<Summary>,
    bookmark: Option<String>,
}

impl StreamCore {
    /// Builds the stream state from a RUN reply. Assumes the first PULL was
    /// pipelined right behind the RUN.
    pub(crate) fn start(
        mut run_meta: ValueMap,
        fetch_size: i64,
        server: ServerInfo,
    ) -> Result<Self> {
        let keys: Arc<[String]> = take_field_names(&mut run_meta)?.into();
        let qid = run_meta.get("qid").and_then(Value::as_int).unwrap_or(-1);
        let mut summary = Summary::new(server);
        summary.absorb_run_meta(&mut run_meta);
        Ok(Self {
            keys,
            qid,
            fetch_size,
            buffer: VecDeque::new(),
            next_index: 0,
            position: 0,
            batches_requested: 1,
            expected: VecDeque::from([BatchKind::Fetch]),
            phase: Phase::Streaming,
            summary: Some(summary),
            bookmark: None,
        })
    }

    pub(crate) fn keys(&self) -> &[String] {
        &self.keys
    }

    pub(crate) fn take_summary(&mut self) -> Option<Summary> {
        match self.phase {
            Phase::Complete => self.summary.take(),
            _ => None,
        }
    }

    pub(crate) fn take_bookmark(&mut self) -> Option<String> {
        self.bookmark.take()
    }

    /// Produces the next record, asking the server for more whenever the
    /// buffer runs dry.
    pub(crate) fn advance(&mut self, connection: &mut Connection) -> Option<Result<Record>> {
        loop {
            while let Some(record) = self.buffer.pop_front() {
                let index = self.next_index;
                self.next_index += 1;
                if index < self.position {
                    continue;
                }
                self.position = index + 1;
                return Some(Ok(record));
            }
            match self.phase {
                Phase::Complete | Phase::Broken => return None,
                Phase::Streaming | Phase::Draining => {}
            }
            if self.expected.is_empty() {
                if let Err(error) = self.request_batch(connection) {
                    return Some(Err(error));
                }
                continue;
            }
            if let Err(error) = self.step(connection) {
                return Some(Err(error));
            }
        }
    }

    fn request_batch(&mut self, connection: &mut Connection) -> Result<()> {
        let request = match self.phase {
            Phase::Streaming => {
                self.batches_requested += 1;
                Request::Pull {
                    n: self.fetch_size,
                    qid: self.qid,
                }
            }
            Phase::Draining => Request::Discard {
                n: -1,
                qid: self.qid,
            },
            Phase::Complete | Phase::Broken => unreachable!("nothing left to request"),
        };
        self.expected.push_back(BatchKind::Fetch);
        let outcome = connection
            .send(&request)
            .and_then(|_| connection.flush(None));
        if let Err(error) = outcome {
            self.phase = Phase::Broken;
            return Err(error);
        }
        Ok(())
    }

    /// Processes exactly one server response.
    fn step(&mut self, connection: &mut Connection) -> Result<()> {
        match connection.recv_response(None) {
            Err(error) => {
                self.phase = Phase::Broken;
                Err(error)
            }
            Ok(Response::Record(values)) => {
                if self.phase == Phase::Draining {
                    // a batch that was already on the wire; count it, drop it
                    self.next_index += 1;
                    return Ok(());
                }
                if values.len() != self.keys.len() {
                    self.phase = Phase::Broken;
                    return Err(Error::protocol(format!(
                        "record with {} values under a header of {} columns",
                        values.len(),
                        self.keys.len()
                    )));
                }
                self.buffer
                    .push_back(Record::new(Arc::clone(&self.keys), values));
                Ok(())
            }
            Ok(Response::Success(mut meta)) => {
                let Some(kind) = self.expected.pop_front() else {
                    self.phase = Phase::Broken;
                    return Err(Error::protocol("summary without an outstanding batch"));
                };
                let has_more = meta
                    .get("has_more")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if has_more {
                    if let BatchKind::Skip { base } = kind {
                        // everything still buffered precedes the seek target
                        self.buffer.clear();
                        self.next_index = base;
                    }
                    return Ok(());
                }
                if let Some(Value::String(token)) = meta.remove("bookmark") {
                    self.bookmark = Some(token);
                }
                if let Some(summary) = self.summary.as_mut() {
                    summary.absorb_final_meta(&mut meta);
                }
                self.phase = Phase::Complete;
                Ok(())
            }
            Ok(Response::Failure(error)) => {
                self.expected.pop_front();
                self.phase = Phase::Broken;
                Err(error.into())
            }
            Ok(Response::Ignored) => {
                self.expected.pop_front();
                self.phase = Phase::Broken;
                Err(Error::protocol("the result stream was ignored"))
            }
        }
    }

    /// Moves the cursor forward to `target` without yielding the skipped
    /// records. Whole batches that were not requested yet are discarded
    /// server-side; the remainder is dropped client-side as it arrives.
    pub(crate) fn seek(&mut self, connection: &mut Connection, target: usize) -> Result<()> {
        if target < self.position {
            return Err(Error::config(format!(
                "cannot seek backwards: the cursor is at {} and {} was requested",
                self.position, target
            )));
        }
        self.position = target;
        if self.fetch_size < 0 {
            // the whole stream arrives as a single batch; skipping is
            // entirely client-side
            return Ok(());
        }
        // settle in-flight batches so the skip is computed against a quiet
        // stream
        while !self.expected.is_empty() {
            self.step(connection)?;
        }
        if self.phase != Phase::Streaming {
            return Ok(());
        }
        let batch = self.fetch_size as usize;
        let skip = whole_batches_to_skip(target, self.batches_requested, batch);
        if skip == 0 {
            // the target sits in an already requested batch, or in the very
            // next one
            return Ok(());
        }
        let target_batch = target / batch;
        connection.send(&Request::Discard {
            n: skip as i64,
            qid: self.qid,
        })?;
        connection.flush(None)?;
        self.expected.push_back(BatchKind::Skip {
            base: target_batch * batch,
        });
        self.batches_requested = target_batch;
        Ok(())
    }

    /// Throws the rest of the stream away (`DISCARD n=-1`); the terminal
    /// summary and bookmark are still collected.
    pub(crate) fn drain(&mut self, connection: &mut Connection) -> Result<()> {
        if self.phase == Phase::Streaming {
            let buffered = self.buffer.len();
            self.buffer.clear();
            self.next_index += buffered;
            self.phase = Phase::Draining;
        }
        loop {
            match self.phase {
                Phase::Complete | Phase::Broken => return Ok(()),
                Phase::Streaming | Phase::Draining => {}
            }
            if self.expected.is_empty() {
                self.request_batch(connection)?;
            }
            self.step(connection)?;
        }
    }
}

/// The whole-batch part of a seek as sent to the server:
/// `(target/n - requested) * n` records can be skipped without transferring
/// them; the rest is dropped client-side as it arrives.
fn whole_batches_to_skip(target: usize, batches_requested: usize, fetch_size: usize) -> usize {
    let target_batch = target / fetch_size;
    match target_batch > batches_requested {
        true => (target_batch - batches_requested) * fetch_size,
        false => 0,
    }
}

/// The lazy result of an auto-commit [`Session::run()`](crate::Session::run).
///
/// The cursor owns its connection until the stream ends (terminal summary,
/// [`ResultCursor::discard()`], drop, or a failure); at that point the
/// connection returns to the pool and the server's bookmark is folded into
/// the session's causal chain.
#[derive(Debug)]
pub struct ResultCursor<'s> {
    guard: PoolGuard,
    core: StreamCore,
    chain: &'s mut Bookmarks,
}

impl<'s> ResultCursor<'s> {
    pub(crate) fn new(guard: PoolGuard, core: StreamCore, chain: &'s mut Bookmarks) -> Self {
        Self { guard, core, chain }
    }

    /// The result's column names, as announced by the server for this
    /// query. Independent of where the cursor currently points.
    pub fn keys(&self) -> &[String] {
        self.core.keys()
    }

    /// See [`StreamCore::seek`]: forward-only; seeking backwards is a
    /// [`Error::Config`], seeking past the end exhausts the stream.
    pub fn seek(&mut self, position: usize) -> Result<()> {
        let outcome = self.core.seek(self.guard.connection(), position);
        self.after_io(outcome)
    }

    /// Drops all remaining records without transferring them. Further
    /// iteration yields nothing; the summary stays available through
    /// [`ResultCursor::consume()`].
    pub fn discard(&mut self) -> Result<()> {
        let outcome = self.core.drain(self.guard.connection());
        self.after_io(outcome)
    }

    /// Discards whatever is left and hands back the query summary.
    ///
    /// Returns `None` if the stream previously failed.
    pub fn consume(mut self) -> Result<Option<Summary>> {
        let outcome = self.core.drain(self.guard.connection());
        self.after_io(outcome)?;
        Ok(self.core.take_summary())
    }

    fn after_io<T>(&mut self, outcome: Result<T>) -> Result<T> {
        if let Err(error) = &outcome {
            self.guard.flag(error);
        }
        if let Some(token) = self.core.take_bookmark() {
            self.chain.rebase(token);
        }
        outcome
    }
}

impl Iterator for ResultCursor<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.core.advance(self.guard.connection());
        if let Some(Err(error)) = &item {
            self.guard.flag(error);
        }
        if let Some(token) = self.core.take_bookmark() {
            self.chain.rebase(token);
        }
        item
    }
}

impl Drop for ResultCursor<'_> {
    fn drop(&mut self) {
        // dropping an open cursor implies discarding it; the pool would
        // reset the connection anyway, but this way the bookmark is kept
        let _ = self.core.drain(self.guard.connection());
        if let Some(token) = self.core.take_bookmark() {
            self.chain.rebase(token);
        }
    }
}

/// The lazy result of [`Transaction::run()`](crate::Transaction::run).
///
/// Borrows the transaction (and with it the connection) mutably, which is
/// what limits a transaction to one live stream at a time: the previous
/// cursor must be dropped before the next statement runs or the transaction
/// is committed.
#[derive(Debug)]
pub struct TransactionCursor<'t> {
    guard: &'t mut PoolGuard,
    core: StreamCore,
}

impl<'t> TransactionCursor<'t> {
    pub(crate) fn new(guard: &'t mut PoolGuard, core: StreamCore) -> Self {
        Self { guard, core }
    }

    /// See [`ResultCursor::keys()`].
    pub fn keys(&self) -> &[String] {
        self.core.keys()
    }

    /// See [`ResultCursor::seek()`].
    pub fn seek(&mut self, position: usize) -> Result<()> {
        let outcome = self.core.seek(self.guard.connection(), position);
        self.flag(outcome)
    }

    /// See [`ResultCursor::discard()`].
    pub fn discard(&mut self) -> Result<()> {
        let outcome = self.core.drain(self.guard.connection());
        self.flag(outcome)
    }

    /// Discards whatever is left and hands back this statement's summary.
    pub fn consume(mut self) -> Result<Option<Summary>> {
        let outcome = self.core.drain(self.guard.connection());
        self.flag(outcome)?;
        Ok(self.core.take_summary())
    }

    fn flag<T>(&self, outcome: Result<T>) -> Result<T> {
        if let Err(error) = &outcome {
            self.guard.flag(error);
        }
        outcome
    }
}

impl Iterator for TransactionCursor<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.core.advance(self.guard.connection());
        if let Some(Err(error)) = &item {
            self.guard.flag(error);
        }
        item
    }
}

impl Drop for TransactionCursor<'_> {
    fn drop(&mut self) {
        // settle the stream so the connection is in step for the next
        // statement or COMMIT
        let _ = self.core.drain(self.guard.connection());
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::whole_batches_to_skip;

    #[rstest]
    // inside the batch already on the wire
    #[case(0, 1, 1000, 0)]
    #[case(999, 1, 1000, 0)]
    // in the batch the next regular PULL covers anyway
    #[case(1999, 1, 1000, 0)]
    // seek(5800) with a fetch size of 1000 right after RUN+PULL skips
    // batches 1 through 4 on the server
    #[case(5800, 1, 1000, 4000)]
    // batch boundary
    #[case(3000, 1, 1000, 2000)]
    // everything up to the target was already requested
    #[case(5800, 6, 1000, 0)]
    // tiny batches
    #[case(5, 1, 2, 2)]
    fn server_side_skip_matches_the_demand_protocol(
        #[case] target: usize,
        #[case] batches_requested: usize,
        #[case] fetch_size: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(
            whole_batches_to_skip(target, batches_requested, fetch_size),
            expected
        );
    }
}
