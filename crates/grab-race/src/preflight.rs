//! Pre-race probe: one intent submission plus a single poll for the
//! top-ranked target, to exercise credentials and the session before the
//! window opens. Its outcome is logged and never affects the race.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use grab_core::{Outcome, Target};

use crate::client::EnrollmentApi;
use crate::poll::{call_with_timeout, poll_until_ready, PollOutcome, PollPolicy};

pub struct Preflight<A: ?Sized> {
    api: Arc<A>,
    request_timeout: Duration,
}

impl<A: EnrollmentApi + ?Sized> Preflight<A> {
    pub fn new(api: Arc<A>, request_timeout: Duration) -> Self {
        Preflight { api, request_timeout }
    }

    pub async fn probe(&self, target: &Target) -> Outcome {
        let outcome = self.run(target).await;
        if outcome.is_win() || matches!(outcome, Outcome::Transient(_)) {
            info!(slot = %target.slot, label = %target.label, %outcome, "Preflight finished");
        } else {
            warn!(slot = %target.slot, label = %target.label, %outcome, "Preflight finished");
        }
        outcome
    }

    async fn run(&self, target: &Target) -> Outcome {
        let intent_id = match call_with_timeout(self.request_timeout, self.api.submit_intent(target.slot)).await {
            Ok(id) => id,
            Err(e) => return Outcome::transient(format!("intent: {}", e)),
        };

        let api = &self.api;
        let once = PollPolicy::once(self.request_timeout);
        match poll_until_ready(&once, || api.poll_intent(&intent_id)).await {
            PollOutcome::Ready(response) => response.classify(),
            PollOutcome::NotReady => Outcome::transient("no intent result"),
            PollOutcome::Failed(reason) => Outcome::transient(format!("intent poll: {}", reason)),
        }
    }
}
