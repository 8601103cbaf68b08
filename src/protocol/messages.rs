// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

//! The message catalogue: every request the client can issue and every
//! response the server can give, plus their wire encodings.

use std::time::Duration;

use super::packstream::{
    pack_int, pack_list_header, pack_map_header, pack_string, pack_struct_header, pack_value,
    Unpacker,
};
use super::version::Version;
use crate::auth::AuthToken;
use crate::bookmarks::Bookmarks;
use crate::driver::AccessMode;
use crate::errors::{Error, Result, ServerError};
use crate::statement::Statement;
use crate::value::{Value, ValueMap};

const HELLO: u8 = 0x01;
const GOODBYE: u8 = 0x02;
const RESET: u8 = 0x0F;
const RUN: u8 = 0x10;
const BEGIN: u8 = 0x11;
const COMMIT: u8 = 0x12;
const ROLLBACK: u8 = 0x13;
const DISCARD: u8 = 0x2F;
const PULL: u8 = 0x3F;
const ROUTE: u8 = 0x66;

const SUCCESS: u8 = 0x70;
const RECORD: u8 = 0x71;
const IGNORED: u8 = 0x7E;
const FAILURE: u8 = 0x7F;

/// Everything an auto-commit RUN or a BEGIN sends along to scope the
/// transaction: the causal chain, the access mode, the target database, and
/// the server-side limits.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TxContext<'a> {
    pub(crate) bookmarks: &'a Bookmarks,
    pub(crate) mode: AccessMode,
    pub(crate) db: Option<&'a str>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) metadata: Option<&'a ValueMap>,
}

#[derive(Debug)]
pub(crate) enum Request<'a> {
    Hello {
        user_agent: &'a str,
        auth: &'a AuthToken,
        routing: Option<&'a ValueMap>,
    },
    Goodbye,
    Reset,
    Run {
        statement: &'a Statement,
        /// `Some` makes this an auto-commit run; inside a transaction the
        /// scope was already established by BEGIN.
        scope: Option<TxContext<'a>>,
    },
    Discard {
        n: i64,
        qid: i64,
    },
    Pull {
        n: i64,
        qid: i64,
    },
    Begin {
        context: TxContext<'a>,
    },
    Commit,
    Rollback,
    Route {
        routing: &'a ValueMap,
        bookmarks: &'a Bookmarks,
        db: Option<&'a str>,
    },
}

/// Which request kind a response will answer; queued per connection so
/// pipelined requests can be matched back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Await {
    Hello,
    Reset,
    Run,
    Discard,
    Pull,
    Begin,
    Commit,
    Rollback,
    Route,
}

impl Request<'_> {
    pub(crate) fn awaits(&self) -> Option<Await> {
        match self {
            Request::Hello { .. } => Some(Await::Hello),
            Request::Goodbye => None,
            Request::Reset => Some(Await::Reset),
            Request::Run { .. } => Some(Await::Run),
            Request::Discard { .. } => Some(Await::Discard),
            Request::Pull { .. } => Some(Await::Pull),
            Request::Begin { .. } => Some(Await::Begin),
            Request::Commit => Some(Await::Commit),
            Request::Rollback => Some(Await::Rollback),
            Request::Route { .. } => Some(Await::Route),
        }
    }

    /// One-line rendition for the wire log; never includes credentials.
    pub(crate) fn describe(&self) -> String {
        match self {
            Request::Hello {
                user_agent, auth, ..
            } => format!(
                "HELLO {{user_agent: {user_agent:?}, scheme: {:?}}}",
                auth.scheme()
            ),
            Request::Goodbye => String::from("GOODBYE"),
            Request::Reset => String::from("RESET"),
            Request::Run { statement, scope } => format!(
                "RUN {:?} ({} parameters{})",
                statement.text(),
                statement.parameters().len(),
                match scope {
                    Some(_) => ", auto-commit",
                    None => "",
                }
            ),
            Request::Discard { n, qid } => format!("DISCARD {{n: {n}, qid: {qid}}}"),
            Request::Pull { n, qid } => format!("PULL {{n: {n}, qid: {qid}}}"),
            Request::Begin { .. } => String::from("BEGIN"),
            Request::Commit => String::from("COMMIT"),
            Request::Rollback => String::from("ROLLBACK"),
            Request::Route { db, .. } => format!("ROUTE {{db: {db:?}}}"),
        }
    }
}

/// Encodes `request` for `version`. `last_qid` is the stream id the server
/// assigned to the most recent RUN; PULL and DISCARD may omit a matching
/// qid.
pub(crate) fn encode(
    request: &Request,
    version: Version,
    last_qid: Option<i64>,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    match request {
        Request::Hello {
            user_agent,
            auth,
            routing,
        } => {
            pack_struct_header(&mut out, HELLO, 1);
            let mut extras: Vec<(&str, Value)> =
                vec![("user_agent", Value::from(*user_agent))];
            if let Some(routing) = routing {
                extras.push(("routing", Value::Map((*routing).clone())));
            }
            extras.extend(auth.hello_entries());
            pack_map_header(&mut out, extras.len())?;
            for (key, value) in &extras {
                pack_string(&mut out, key)?;
                pack_value(&mut out, value)?;
            }
        }
        Request::Goodbye => pack_struct_header(&mut out, GOODBYE, 0),
        Request::Reset => pack_struct_header(&mut out, RESET, 0),
        Request::Run { statement, scope } => {
            pack_struct_header(&mut out, RUN, 3);
            pack_string(&mut out, statement.text())?;
            pack_map(&mut out, statement.parameters())?;
            match scope {
                Some(context) => pack_tx_extras(&mut out, context)?,
                None => pack_map_header(&mut out, 0)?,
            }
        }
        Request::Discard { n, qid } => {
            pack_struct_header(&mut out, DISCARD, 1);
            pack_stream_extras(&mut out, *n, *qid, last_qid)?;
        }
        Request::Pull { n, qid } => {
            pack_struct_header(&mut out, PULL, 1);
            pack_stream_extras(&mut out, *n, *qid, last_qid)?;
        }
        Request::Begin { context } => {
            pack_struct_header(&mut out, BEGIN, 1);
            pack_tx_extras(&mut out, context)?;
        }
        Request::Commit => pack_struct_header(&mut out, COMMIT, 0),
        Request::Rollback => pack_struct_header(&mut out, ROLLBACK, 0),
        Request::Route {
            routing,
            bookmarks,
            db,
        } => {
            if version < Version::V4_3 {
                // callers fall back to the routing table procedure instead
                return Err(Error::protocol(
                    "the ROUTE message requires protocol 4.3 or newer",
                ));
            }
            pack_struct_header(&mut out, ROUTE, 3);
            pack_map(&mut out, routing)?;
            pack_list_header(&mut out, bookmarks.len())?;
            for token in bookmarks.raw() {
                pack_string(&mut out, token)?;
            }
            if version >= Version::V4_4 {
                // 4.4 moved the target database into an extras dictionary
                pack_map_header(&mut out, usize::from(db.is_some()))?;
                if let Some(db) = db {
                    pack_string(&mut out, "db")?;
                    pack_string(&mut out, db)?;
                }
            } else {
                match db {
                    Some(db) => pack_string(&mut out, db)?,
                    None => pack_value(&mut out, &Value::Null)?,
                }
            }
        }
    }
    Ok(out)
}

fn pack_map(out: &mut Vec<u8>, map: &ValueMap) -> Result<()> {
    pack_map_header(out, map.len())?;
    for (key, value) in map {
        pack_string(out, key)?;
        pack_value(out, value)?;
    }
    Ok(())
}

fn pack_stream_extras(out: &mut Vec<u8>, n: i64, qid: i64, last_qid: Option<i64>) -> Result<()> {
    // the server assumes "the last started stream" when qid is absent
    let with_qid = qid != -1 && last_qid != Some(qid);
    pack_map_header(out, 1 + usize::from(with_qid))?;
    pack_string(out, "n")?;
    pack_int(out, n);
    if with_qid {
        pack_string(out, "qid")?;
        pack_int(out, qid);
    }
    Ok(())
}

fn pack_tx_extras(out: &mut Vec<u8>, context: &TxContext) -> Result<()> {
    let bookmarks = (!context.bookmarks.is_empty()).then_some(context.bookmarks);
    let metadata = context.metadata.filter(|metadata| !metadata.is_empty());
    // write access is what the server assumes anyway
    let mode = matches!(context.mode, AccessMode::Read).then_some("r");

    let entries = usize::from(bookmarks.is_some())
        + usize::from(context.timeout.is_some())
        + usize::from(metadata.is_some())
        + usize::from(mode.is_some())
        + usize::from(context.db.is_some());
    pack_map_header(out, entries)?;

    if let Some(bookmarks) = bookmarks {
        pack_string(out, "bookmarks")?;
        pack_list_header(out, bookmarks.len())?;
        for token in bookmarks.raw() {
            pack_string(out, token)?;
        }
    }
    if let Some(timeout) = context.timeout {
        pack_string(out, "tx_timeout")?;
        pack_int(out, timeout.as_millis().min(i64::MAX as u128) as i64);
    }
    if let Some(metadata) = metadata {
        pack_string(out, "tx_metadata")?;
        pack_map(out, metadata)?;
    }
    if let Some(mode) = mode {
        pack_string(out, "mode")?;
        pack_string(out, mode)?;
    }
    if let Some(db) = context.db {
        pack_string(out, "db")?;
        pack_string(out, db)?;
    }
    Ok(())
}

/// Pulls the ordered result column names out of a RUN SUCCESS.
pub(crate) fn take_field_names(meta: &mut ValueMap) -> Result<Vec<String>> {
    let Some(Value::List(fields)) = meta.remove("fields") else {
        return Err(Error::protocol("RUN reply carried no field list"));
    };
    fields
        .into_iter()
        .map(|field| {
            field
                .into_string()
                .ok_or_else(|| Error::protocol("a result field name is not a string"))
        })
        .collect()
}

/// One message received from the server.
#[derive(Debug)]
pub(crate) enum Response {
    Success(ValueMap),
    Record(Vec<Value>),
    Ignored,
    Failure(ServerError),
}

pub(crate) fn decode_response(bytes: &[u8]) -> Result<Response> {
    let mut unpacker = Unpacker::new(bytes);
    let message = unpacker.value()?;
    if !unpacker.exhausted() {
        return Err(Error::protocol("trailing bytes after a server message"));
    }
    let Value::Struct { tag, mut fields } = message else {
        return Err(Error::protocol(format!(
            "expected a message structure, got {}",
            message.kind()
        )));
    };
    let sole_field = |fields: &mut Vec<Value>| {
        (fields.len() == 1)
            .then(|| fields.pop().expect("checked length"))
            .ok_or_else(|| Error::protocol("server message with unexpected field count"))
    };
    match tag {
        SUCCESS => match sole_field(&mut fields)? {
            Value::Map(meta) => Ok(Response::Success(meta)),
            other => Err(Error::protocol(format!(
                "SUCCESS metadata must be a map, got {}",
                other.kind()
            ))),
        },
        RECORD => match sole_field(&mut fields)? {
            Value::List(values) => Ok(Response::Record(values)),
            other => Err(Error::protocol(format!(
                "RECORD payload must be a list, got {}",
                other.kind()
            ))),
        },
        IGNORED => Ok(Response::Ignored),
        FAILURE => match sole_field(&mut fields)? {
            Value::Map(meta) => Ok(Response::Failure(ServerError::from_bolt_meta(meta))),
            other => Err(Error::protocol(format!(
                "FAILURE metadata must be a map, got {}",
                other.kind()
            ))),
        },
        other => Err(Error::protocol(format!(
            "unknown server message tag {other:#04X}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::value_map;

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|window| window == needle)
    }

    fn bookmarks(raw: &[&str]) -> Bookmarks {
        Bookmarks::from_raw(raw.iter().map(|s| String::from(*s)))
    }

    #[test]
    fn hello_masks_nothing_but_describes_safely() {
        let auth = AuthToken::basic("neo4j", "hunter2");
        let request = Request::Hello {
            user_agent: "test/0",
            auth: &auth,
            routing: None,
        };
        let encoded = encode(&request, Version::V4_4, None).unwrap();
        assert_eq!(encoded[1], HELLO);
        assert!(contains(&encoded, b"hunter2"));
        assert!(!request.describe().contains("hunter2"));
    }

    #[test]
    fn auto_commit_run_carries_the_transaction_scope() {
        let statement = Statement::new("RETURN $x")
            .with_parameters(value_map! { "x" => 1 })
            .with_timeout(Duration::from_millis(1500));
        let chain = bookmarks(&["bm-7"]);
        let request = Request::Run {
            statement: &statement,
            scope: Some(TxContext {
                bookmarks: &chain,
                mode: AccessMode::Read,
                db: Some("movies"),
                timeout: statement.timeout(),
                metadata: None,
            }),
        };
        let encoded = encode(&request, Version::V4_4, None).unwrap();
        assert_eq!(encoded[1], RUN);
        for needle in [
            b"RETURN $x".as_slice(),
            b"bm-7",
            b"tx_timeout",
            b"mode",
            b"movies",
        ] {
            assert!(contains(&encoded, needle), "missing {needle:?}");
        }
    }

    #[test]
    fn in_transaction_run_sends_empty_extras() {
        let statement = Statement::new("RETURN 1");
        let request = Request::Run {
            statement: &statement,
            scope: None,
        };
        let encoded = encode(&request, Version::V4_4, None).unwrap();
        // struct header, RUN, tiny string, text, empty params, empty extras
        assert_eq!(encoded[encoded.len() - 1], 0xA0);
        assert_eq!(encoded[encoded.len() - 2], 0xA0);
    }

    #[rstest]
    // no stream id assigned yet: nothing to repeat
    #[case(-1, None, false)]
    // repeating the stream the server just started is redundant
    #[case(7, Some(7), false)]
    #[case(7, Some(3), true)]
    #[case(7, None, true)]
    fn qid_is_omitted_when_redundant(
        #[case] qid: i64,
        #[case] last_qid: Option<i64>,
        #[case] expected: bool,
    ) {
        let request = Request::Pull { n: 10, qid };
        let encoded = encode(&request, Version::V4_4, last_qid).unwrap();
        assert_eq!(contains(&encoded, b"qid"), expected);
    }

    #[test]
    fn route_encoding_is_version_gated() {
        let routing = value_map! { "address" => "example.com:7687" };
        let chain = Bookmarks::default();
        let request = Request::Route {
            routing: &routing,
            bookmarks: &chain,
            db: Some("movies"),
        };
        let v44 = encode(&request, Version::V4_4, None).unwrap();
        let v43 = encode(&request, Version::V4_3, None).unwrap();
        assert!(contains(&v44, b"\x82db\x86movies"));
        assert!(!contains(&v43, b"\x82db"));
        assert!(contains(&v43, b"\x86movies"));
        assert!(matches!(
            encode(&request, Version::V4_2, None),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn responses_decode_by_tag() {
        // SUCCESS {"has_more": true}
        let success = [0xB1, 0x70, 0xA1, 0x88, b'h', b'a', b's', b'_', b'm', b'o', b'r', b'e', 0xC3];
        let Response::Success(meta) = decode_response(&success).unwrap() else {
            panic!("expected SUCCESS");
        };
        assert_eq!(meta.get("has_more"), Some(&Value::Boolean(true)));

        // RECORD [42]
        let record = [0xB1, 0x71, 0x91, 0x2A];
        let Response::Record(values) = decode_response(&record).unwrap() else {
            panic!("expected RECORD");
        };
        assert_eq!(values, vec![Value::Integer(42)]);

        // IGNORED
        assert!(matches!(
            decode_response(&[0xB0, 0x7E]).unwrap(),
            Response::Ignored
        ));

        // FAILURE {"code": "Neo.ClientError.Fake.Fake", "message": "nope"}
        let mut failure = vec![0xB1, 0x7F];
        pack_map_header(&mut failure, 2).unwrap();
        pack_string(&mut failure, "code").unwrap();
        pack_string(&mut failure, "Neo.ClientError.Fake.Fake").unwrap();
        pack_string(&mut failure, "message").unwrap();
        pack_string(&mut failure, "nope").unwrap();
        let Response::Failure(error) = decode_response(&failure).unwrap() else {
            panic!("expected FAILURE");
        };
        assert_eq!(error.code(), "Neo.ClientError.Fake.Fake");

        // unknown tag
        assert!(decode_response(&[0xB0, 0x55]).is_err());
    }
}
