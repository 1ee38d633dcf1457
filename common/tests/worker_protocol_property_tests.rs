// Property-based tests for the worker line protocol and request loop

use async_trait::async_trait;
use common::gateway::protocol::{decode_reply, encode_reply, encode_signal};
use common::gateway::{WorkerReply, WorkerSignal};
use common::worker::{serve, ServeOutcome, TickHandler};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fails the ticks whose position is set in `failures`
struct ScriptedHandler {
    calls: AtomicUsize,
    failures: Vec<bool>,
}

#[async_trait]
impl TickHandler for ScriptedHandler {
    async fn on_tick(&self) -> Result<(), String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.get(call).copied().unwrap_or(false) {
            Err(format!("tick {call} failed"))
        } else {
            Ok(())
        }
    }
}

/// *For any* error message, the encoded reply is exactly one line and
/// carries the message intact.
#[test]
fn property_reply_is_single_line() {
    proptest!(|(message in any::<String>())| {
        let line = encode_reply(&WorkerReply::error(message.clone())).unwrap();

        prop_assert!(line.ends_with('\n'));
        prop_assert_eq!(line.matches('\n').count(), 1);
        prop_assert_eq!(decode_reply(&line).unwrap(), WorkerReply::Error { message });
    });
}

/// *For any* number of queued ticks N and request limit M, the worker
/// answers min(N, M) of them, one reply line each, and reports why it stopped.
#[test]
fn property_serve_answers_until_limit_or_eof() {
    proptest!(|(
        failures in proptest::collection::vec(any::<bool>(), 0..40),
        max_requests in 1u32..50u32
    )| {
        let tick = encode_signal(&WorkerSignal::Tick).unwrap();
        let input = tick.repeat(failures.len());
        let handler = ScriptedHandler {
            calls: AtomicUsize::new(0),
            failures: failures.clone(),
        };

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let mut output = Vec::new();
        let outcome = runtime
            .block_on(serve(input.as_bytes(), &mut output, &handler, max_requests))
            .unwrap();

        let expected = failures.len().min(max_requests as usize);
        let replies: Vec<WorkerReply> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| decode_reply(line).unwrap())
            .collect();

        prop_assert_eq!(replies.len(), expected);
        prop_assert_eq!(handler.calls.load(Ordering::SeqCst), expected);
        for (reply, failed) in replies.iter().zip(&failures) {
            prop_assert_eq!(matches!(reply, WorkerReply::Error { .. }), *failed);
        }

        let served = expected as u32;
        if failures.len() >= max_requests as usize {
            prop_assert_eq!(outcome, ServeOutcome::Recycle { served });
        } else {
            prop_assert_eq!(outcome, ServeOutcome::HostClosed { served });
        }
    });
}
