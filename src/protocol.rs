// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

//! The Bolt wire protocol: version negotiation, chunked framing, PackStream
//! values, the message catalogue, and the per-connection state machine.

pub(crate) mod connection;
pub(crate) mod frame;
pub(crate) mod messages;
pub(crate) mod packstream;
pub(crate) mod state;
pub(crate) mod version;
