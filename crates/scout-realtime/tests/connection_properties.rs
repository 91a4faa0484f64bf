//! Generated sequences of lifecycle calls against a running client.
//!
//! After every step the clock is moved past the backoff ceiling, so any
//! pending retry has resolved before the connection is inspected.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use scout_realtime::testing::ScriptedTransport;
use scout_realtime::{
    ClientConfig, CredentialProvider, EventStreamClient, SessionStore, Transport,
};

#[derive(Clone, Copy, Debug)]
enum Op {
    Connect,
    Disconnect,
    Reconnect,
    DropStream,
    Login,
    Logout,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Connect),
        Just(Op::Disconnect),
        Just(Op::Reconnect),
        Just(Op::DropStream),
        Just(Op::Login),
        Just(Op::Logout),
    ]
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Runs `ops` and checks the open-connection count after each one.
///
/// `expect_open` tracks whether the client should hold a stream: set by
/// `connect()`/`reconnect()` when a credential exists, cleared by
/// `disconnect()`, and re-evaluated whenever a dropped stream retries.
fn run_ops(start_logged_in: bool, ops: &[Op]) -> Result<(), TestCaseError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .map_err(|e| TestCaseError::fail(e.to_string()))?;

    runtime.block_on(async {
        let transport = Arc::new(ScriptedTransport::new());
        let session = Arc::new(if start_logged_in {
            SessionStore::with_token("tok")
        } else {
            SessionStore::new()
        });
        let client = EventStreamClient::new(
            ClientConfig::new("https://api.scout.app/events"),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&session) as Arc<dyn CredentialProvider>,
        );

        let mut expect_open = false;
        for (step, op) in ops.iter().enumerate() {
            let logged_in = session.is_present();
            match op {
                Op::Connect => {
                    client.connect();
                    if !expect_open {
                        expect_open = logged_in;
                    }
                }
                Op::Disconnect => {
                    client.disconnect();
                    expect_open = false;
                }
                Op::Reconnect => {
                    client.reconnect();
                    expect_open = logged_in;
                }
                Op::DropStream => {
                    if let Some(conn) = transport.last_connection() {
                        let _ = conn.close();
                    }
                    if expect_open {
                        expect_open = logged_in;
                    }
                }
                Op::Login => session.set_token("tok"),
                Op::Logout => session.clear(),
            }
            settle().await;
            tokio::time::advance(Duration::from_secs(31)).await;
            settle().await;

            let open = transport.open_connections();
            prop_assert!(open <= 1, "step {step} {op:?}: {open} open connections");
            prop_assert_eq!(open == 1, expect_open, "step {} {:?}", step, op);
            prop_assert_eq!(client.is_active(), expect_open, "step {} {:?}", step, op);
        }
        Ok(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn at_most_one_stream_and_open_iff_connected(
        start_logged_in in any::<bool>(),
        ops in proptest::collection::vec(op(), 1..24),
    ) {
        run_ops(start_logged_in, &ops)?;
    }
}
