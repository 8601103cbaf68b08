// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

//! # neo4j-client
//!
//! A client for Neo4j graph databases speaking the Bolt protocol (4.2–5.0,
//! plain TCP or TLS), against single instances and clusters.
//!
//! The building blocks, from the outside in:
//!
//! * [`Driver`] — owns the connection pool; one per database URI.
//! * [`Session`] — a unit of work; chains its transactions causally through
//!   [`Bookmarks`].
//! * [`Statement`] — Cypher text plus parameters, metadata, and timeout.
//! * [`ResultCursor`] — lazy, batch-wise record stream with forward
//!   [`seek`](ResultCursor::seek) and [`discard`](ResultCursor::discard).
//! * [`Transaction`] — explicit transactions;
//!   [`Session::read_transaction`]/[`Session::write_transaction`] wrap them
//!   with retries.
//!
//! ## Example
//!
//! ```no_run
//! use neo4j_client::{
//!     value_map, AuthToken, ConnectionConfig, Driver, DriverConfig, SessionConfig, Statement,
//!     Value,
//! };
//!
//! # fn main() -> neo4j_client::Result<()> {
//! let driver = Driver::new(
//!     ConnectionConfig::parse("neo4j://localhost:7687")?,
//!     DriverConfig::new().with_auth(AuthToken::basic("neo4j", "verysecret")),
//! )?;
//!
//! let mut session = driver.session(SessionConfig::new().with_database("neo4j"));
//!
//! // one auto-commit statement, streamed lazily
//! let mut people = session.run(
//!     Statement::new("MATCH (p:Person) WHERE p.age > $age RETURN p.name")
//!         .with_parameters(value_map! { "age" => 42 }),
//! )?;
//! for record in &mut people {
//!     let record = record?;
//!     println!("{:?}", record.get("p.name"));
//! }
//!
//! // a managed transaction, retried on transient failures
//! let created = session.write_transaction(|tx| {
//!     let mut cursor = tx.run(
//!         Statement::new("CREATE (p:Person {name: $name}) RETURN p.name")
//!             .with_parameters(value_map! { "name" => "Alice" }),
//!     )?;
//!     let record = cursor.next().expect("one row")?;
//!     Ok(record.into_values().next().unwrap())
//! })?;
//! assert_eq!(created, Value::from("Alice"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Causal consistency
//!
//! Within a session, every transaction observes at least the writes of the
//! previous one: the bookmark the server hands out at commit is fed into the
//! next transaction automatically. To chain across sessions, carry
//! [`Session::last_bookmarks`] into the next session's
//! [`SessionConfig::with_bookmarks`].

mod address;
mod auth;
mod bookmarks;
mod config;
mod cursor;
mod driver;
mod errors;
mod pool;
mod protocol;
mod record;
mod retry;
mod session;
mod statement;
mod summary;
mod transaction;
mod value;

pub use address::Address;
pub use auth::AuthToken;
pub use bookmarks::Bookmarks;
pub use config::{ConnectionConfig, DriverConfig, TlsPolicy};
pub use cursor::{ResultCursor, TransactionCursor};
pub use driver::{AccessMode, Driver};
pub use errors::{Error, Result, ServerError};
pub use record::Record;
pub use retry::ExponentialBackoff;
pub use session::{Session, SessionConfig};
pub use statement::Statement;
pub use summary::{QueryType, ServerInfo, Summary, UpdateCounters};
pub use transaction::Transaction;
pub use value::Value;
