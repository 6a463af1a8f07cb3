//! Property-based tests for bounded waits.
//!
//! Whatever the policy, a wait evaluates its predicate at most
//! `threshold + 1` times and stops at the first round it holds.

use std::cell::Cell;

use duet_core::{EngineFactory, EngineOptions};
use duet_harness::{
    ConditionWaiter, CoverageLog, PeerHandle, RetryOutcome, SimConfig, SimNetwork, WaitOutcome,
    WaitPolicy,
};
use proptest::prelude::*;

fn pair(network: &SimNetwork) -> (PeerHandle, PeerHandle) {
    let options = EngineOptions::default();
    let peer = |name: &str| PeerHandle::new(name, network.create(name, &options).unwrap(), CoverageLog::new());
    (peer("alice"), peer("bob"))
}

fn policy_strategy() -> impl Strategy<Value = WaitPolicy> {
    (0u32..30, 1u32..6, 0u32..3).prop_map(|(threshold, cadence, batch)| WaitPolicy { threshold, cadence, batch })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A predicate that never holds is evaluated exactly `threshold + 1` times.
    #[test]
    fn prop_timeout_is_bounded(policy in policy_strategy()) {
        let network = SimNetwork::new(SimConfig::fast(1));
        let (alice, bob) = pair(&network);
        let mut waiter = ConditionWaiter::new(&alice, &bob, None, policy);

        let calls = Cell::new(0u32);
        let outcome = waiter.until("never", || {
            calls.set(calls.get() + 1);
            false
        });

        prop_assert_eq!(outcome, WaitOutcome::TimedOut { rounds: policy.threshold + 1 });
        prop_assert_eq!(calls.get(), policy.threshold + 1);
    }

    /// A predicate that starts holding at round `k` is satisfied at `k + 1`
    /// evaluations when `k` is within budget, and times out otherwise.
    #[test]
    fn prop_first_success_ends_the_wait(policy in policy_strategy(), k in 0u32..40) {
        let network = SimNetwork::new(SimConfig::fast(2));
        let (alice, bob) = pair(&network);
        let mut waiter = ConditionWaiter::new(&alice, &bob, None, policy);

        let calls = Cell::new(0u32);
        let outcome = waiter.until("eventually", || {
            calls.set(calls.get() + 1);
            calls.get() > k
        });

        if k <= policy.threshold {
            prop_assert_eq!(outcome, WaitOutcome::Satisfied { rounds: k + 1 });
        } else {
            prop_assert_eq!(outcome, WaitOutcome::TimedOut { rounds: policy.threshold + 1 });
        }
        prop_assert!(calls.get() <= policy.threshold + 1);
    }

    /// `retry_call` keeps the same bound and never calls again after a value.
    #[test]
    fn prop_retry_call_is_bounded(policy in policy_strategy(), k in 0u32..40) {
        let network = SimNetwork::new(SimConfig::fast(3));
        let (alice, bob) = pair(&network);
        let mut waiter = ConditionWaiter::new(&alice, &bob, None, policy);

        let calls = Cell::new(0u32);
        let outcome = waiter.retry_call("op", || {
            calls.set(calls.get() + 1);
            Ok((calls.get() > k).then_some(calls.get()))
        });

        match outcome {
            RetryOutcome::Succeeded(n) => {
                prop_assert!(k <= policy.threshold);
                prop_assert_eq!(n, k + 1);
            },
            RetryOutcome::TimedOut { rounds } => {
                prop_assert!(k > policy.threshold);
                prop_assert_eq!(rounds, policy.threshold + 1);
            },
            other => prop_assert!(false, "unexpected outcome {:?}", other),
        }
        prop_assert!(calls.get() <= policy.threshold + 1);
    }
}
