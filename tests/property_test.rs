// tests/property_test.rs

//! Property-based tests for invariants that should hold for any input,
//! not just the handful of cases exercised by the unit tests.

use hostctl::core::dispatch::PerHostQueue;
use hostctl::core::ingress::HostMessage;
use hostctl::core::scheduler::WeeklyMask;
use proptest::prelude::*;

fn weekly_mask_char() -> impl Strategy<Value = char> {
    prop::sample::select(vec!['Y', 'N', 'P'])
}

proptest! {
    /// A `WeeklyMask` built from any well-formed 7-character mask must
    /// render back to the exact same mask: `P` is the catch-all slot, not
    /// a lossy default, so round-tripping never collapses a valid input.
    #[test]
    fn weekly_mask_string_round_trips(chars in prop::collection::vec(weekly_mask_char(), 7)) {
        let raw: String = chars.into_iter().collect();
        let mask = WeeklyMask::try_from(raw.clone()).unwrap();
        let back: String = mask.into();
        prop_assert_eq!(raw, back);
    }

    /// Masks of any length other than 7 must always be rejected, never
    /// silently truncated or padded.
    #[test]
    fn weekly_mask_rejects_any_wrong_length(len in (0usize..200).prop_filter("not 7", |n| *n != 7)) {
        let raw = "Y".repeat(len);
        prop_assert!(WeeklyMask::try_from(raw).is_err());
    }

    /// Whatever order datagrams are pushed onto a host's queue, they drain
    /// in that same order -- the dispatcher relies on this to keep a DCS
    /// host's event stream causally ordered.
    #[test]
    fn per_host_queue_preserves_push_order(commands in prop::collection::vec("[a-zA-Z]{1,12}", 0..64)) {
        let queue = PerHostQueue::new();
        for command in &commands {
            queue.push(HostMessage {
                server_name: "blue-flag".into(),
                command: command.clone(),
                payload: serde_json::Value::Null,
            });
        }
        let mut drained = Vec::new();
        while let Some(msg) = queue.pop() {
            drained.push(msg.command);
        }
        prop_assert_eq!(drained, commands);
    }
}
