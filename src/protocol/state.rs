// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

use log::warn;

use super::messages::Await;

/// The server-side state of one connection, advanced from the responses the
/// server sends.
///
/// `TxStreaming` is a deliberate coarsening: the server distinguishes a
/// transaction with open result streams from one without, but since this
/// client runs at most one stream per connection, collapsing the two spares
/// the connection from counting streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServerState {
    Connected,
    Ready,
    Streaming,
    TxReady,
    TxStreaming,
    Failed,
}

impl ServerState {
    /// The state after a SUCCESS answering `request`. A SUCCESS with
    /// `has_more` leaves the stream open and the state untouched.
    pub(crate) fn on_success(self, request: Await, has_more: bool) -> ServerState {
        use Await::*;
        use ServerState::*;

        if has_more && matches!(request, Pull | Discard) {
            return self;
        }
        match (self, request) {
            (_, Reset) => Ready,
            (Connected, Hello) => Ready,
            (Ready, Run) => Streaming,
            (Ready, Begin) => TxReady,
            (Ready, Route) => Ready,
            (Streaming, Pull | Discard) => Ready,
            (TxReady | TxStreaming, Run) => TxStreaming,
            (TxStreaming, Pull | Discard) => TxStreaming,
            (TxReady | TxStreaming, Commit | Rollback) => Ready,
            (state, request) => {
                // a SUCCESS the protocol does not allow here; treat the
                // conversation as derailed so the pool discards or resets it
                warn!("unexpected SUCCESS for {request:?} in state {state:?}");
                Failed
            }
        }
    }

    pub(crate) fn on_failure(self) -> ServerState {
        ServerState::Failed
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ServerState::Connected, Await::Hello, ServerState::Ready)]
    #[case(ServerState::Ready, Await::Run, ServerState::Streaming)]
    #[case(ServerState::Ready, Await::Begin, ServerState::TxReady)]
    #[case(ServerState::Ready, Await::Route, ServerState::Ready)]
    #[case(ServerState::Ready, Await::Reset, ServerState::Ready)]
    #[case(ServerState::Streaming, Await::Pull, ServerState::Ready)]
    #[case(ServerState::Streaming, Await::Discard, ServerState::Ready)]
    #[case(ServerState::Streaming, Await::Reset, ServerState::Ready)]
    #[case(ServerState::TxReady, Await::Run, ServerState::TxStreaming)]
    #[case(ServerState::TxReady, Await::Commit, ServerState::Ready)]
    #[case(ServerState::TxReady, Await::Rollback, ServerState::Ready)]
    #[case(ServerState::TxStreaming, Await::Run, ServerState::TxStreaming)]
    #[case(ServerState::TxStreaming, Await::Pull, ServerState::TxStreaming)]
    #[case(ServerState::TxStreaming, Await::Discard, ServerState::TxStreaming)]
    #[case(ServerState::TxStreaming, Await::Commit, ServerState::Ready)]
    #[case(ServerState::TxStreaming, Await::Rollback, ServerState::Ready)]
    #[case(ServerState::Failed, Await::Reset, ServerState::Ready)]
    fn success_transitions(
        #[case] from: ServerState,
        #[case] request: Await,
        #[case] to: ServerState,
    ) {
        assert_eq!(from.on_success(request, false), to);
    }

    #[rstest]
    #[case(ServerState::Streaming, Await::Pull)]
    #[case(ServerState::Streaming, Await::Discard)]
    #[case(ServerState::TxStreaming, Await::Pull)]
    fn has_more_keeps_the_stream_open(#[case] from: ServerState, #[case] request: Await) {
        assert_eq!(from.on_success(request, true), from);
    }

    #[rstest]
    #[case(ServerState::Ready)]
    #[case(ServerState::Streaming)]
    #[case(ServerState::TxReady)]
    #[case(ServerState::TxStreaming)]
    fn any_failure_fails_the_connection(#[case] from: ServerState) {
        assert_eq!(from.on_failure(), ServerState::Failed);
    }

    #[test]
    fn impossible_transition_derails() {
        assert_eq!(
            ServerState::Ready.on_success(Await::Commit, false),
            ServerState::Failed
        );
    }
}
