//! Test doubles shared by the unit tests of this crate.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;

use grab_core::{Outcome, ResponseFields, SlotId, Target};

use crate::api::{LessonPage, LessonQuery, TerminalResponse};
use crate::client::{EnrollmentApi, LessonSource, SessionCheck};
use crate::clock::TimeSource;
use crate::error::{RaceError, RaceResult};
use crate::observer::RaceObserver;
use crate::poll::{PollPolicy, PollReply};
use crate::scheduler::RaceReport;
use crate::workflow::{AttemptReport, WorkflowPolicy};

/// Short limits so paused-time tests stay readable.
pub fn fast_policy() -> WorkflowPolicy {
    let poll = PollPolicy {
        max_polls: 3,
        interval: Duration::from_millis(10),
        call_timeout: Duration::from_secs(2),
    };
    WorkflowPolicy {
        request_timeout: Duration::from_secs(2),
        intent: poll,
        confirm: poll,
    }
}

fn copy_error(err: &RaceError) -> RaceError {
    match err {
        RaceError::MissingIdentifier => RaceError::MissingIdentifier,
        RaceError::Timeout(ms) => RaceError::Timeout(*ms),
        RaceError::Status(code) => RaceError::Status(*code),
        RaceError::Rejected { code, message } => RaceError::Rejected {
            code: *code,
            message: message.clone(),
        },
        RaceError::CredentialsRejected(m) => RaceError::CredentialsRejected(m.clone()),
        other => RaceError::ConnectionFailed(other.to_string()),
    }
}

fn copy_result(result: &Result<(), RaceError>) -> Result<(), RaceError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => Err(copy_error(e)),
    }
}

// =============================================================================
// Scripted Enrollment API
// =============================================================================

/// Behaviour of one attempt against [`FakeApi`].
#[derive(Debug)]
pub struct AttemptScript {
    /// Delay inside `submit_intent` before it answers.
    pub submit_delay: Duration,
    pub intent_submit: Result<(), RaceError>,
    /// Pending replies before the intent result is ready.
    pub intent_pending: u32,
    pub intent_reply: TerminalResponse,
    pub confirm_submit: Result<(), RaceError>,
    pub confirm_pending: u32,
    pub confirm_reply: TerminalResponse,
}

impl AttemptScript {
    /// Every stage succeeds immediately.
    pub fn success() -> Self {
        AttemptScript {
            submit_delay: Duration::ZERO,
            intent_submit: Ok(()),
            intent_pending: 0,
            intent_reply: TerminalResponse::new("", ResponseFields::succeeded()),
            confirm_submit: Ok(()),
            confirm_pending: 0,
            confirm_reply: TerminalResponse::new("", ResponseFields::succeeded()),
        }
    }
}

impl Clone for AttemptScript {
    fn clone(&self) -> Self {
        AttemptScript {
            submit_delay: self.submit_delay,
            intent_submit: copy_result(&self.intent_submit),
            intent_pending: self.intent_pending,
            intent_reply: self.intent_reply.clone(),
            confirm_submit: copy_result(&self.confirm_submit),
            confirm_pending: self.confirm_pending,
            confirm_reply: self.confirm_reply.clone(),
        }
    }
}

#[derive(Default)]
struct FakeState {
    by_attempt: HashMap<u64, AttemptScript>,
    intent_polls: HashMap<u64, u32>,
    confirm_polls: HashMap<u64, u32>,
    per_slot_intents: HashMap<SlotId, u32>,
}

/// Scripted [`EnrollmentApi`]: the n-th intent submission follows the n-th
/// script, then per-slot scripts, then the repeating fallback.
pub struct FakeApi {
    scripts: Vec<AttemptScript>,
    slot_scripts: HashMap<SlotId, AttemptScript>,
    fallback: Option<AttemptScript>,
    submitted: AtomicU32,
    confirms: AtomicU32,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn new(scripts: Vec<AttemptScript>) -> Self {
        FakeApi {
            scripts,
            slot_scripts: HashMap::new(),
            fallback: None,
            submitted: AtomicU32::new(0),
            confirms: AtomicU32::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn repeating(script: AttemptScript) -> Self {
        FakeApi::new(Vec::new()).then_repeat(script)
    }

    pub fn then_repeat(mut self, script: AttemptScript) -> Self {
        self.fallback = Some(script);
        self
    }

    pub fn for_slot(mut self, slot: SlotId, script: AttemptScript) -> Self {
        self.slot_scripts.insert(slot, script);
        self
    }

    pub fn intents(&self) -> u32 {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn intents_for(&self, slot: SlotId) -> u32 {
        let state = self.state.lock().unwrap();
        state.per_slot_intents.get(&slot).copied().unwrap_or(0)
    }

    pub fn confirms(&self) -> u32 {
        self.confirms.load(Ordering::SeqCst)
    }

    /// Highest number of API calls observed in progress at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn script_for(&self, n: u64, slot: SlotId) -> AttemptScript {
        if let Some(script) = self.scripts.get((n - 1) as usize) {
            return script.clone();
        }
        if let Some(script) = self.slot_scripts.get(&slot) {
            return script.clone();
        }
        match &self.fallback {
            Some(script) => script.clone(),
            None => AttemptScript {
                submit_delay: Duration::from_millis(50),
                intent_submit: Err(RaceError::ConnectionFailed("script exhausted".into())),
                ..AttemptScript::success()
            },
        }
    }

    fn enter(&self) -> InFlight {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(self.active.clone())
    }

    fn attempt_of(id: &str) -> u64 {
        id.rsplit('-').next().and_then(|n| n.parse().ok()).unwrap_or(0)
    }
}

/// Decrements the in-flight counter on drop, including on abort.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EnrollmentApi for FakeApi {
    async fn submit_intent(&self, slot: SlotId) -> RaceResult<String> {
        let _guard = self.enter();
        let n = u64::from(self.submitted.fetch_add(1, Ordering::SeqCst) + 1);
        let script = self.script_for(n, slot);
        {
            let mut state = self.state.lock().unwrap();
            *state.per_slot_intents.entry(slot).or_insert(0) += 1;
            state.by_attempt.insert(n, script.clone());
        }
        if !script.submit_delay.is_zero() {
            tokio::time::sleep(script.submit_delay).await;
        }
        script.intent_submit.map(|_| format!("intent-{}", n))
    }

    async fn poll_intent(&self, intent_id: &str) -> RaceResult<PollReply<TerminalResponse>> {
        let _guard = self.enter();
        let n = Self::attempt_of(intent_id);
        let mut state = self.state.lock().unwrap();
        let (pending, reply) = match state.by_attempt.get(&n) {
            Some(script) => (script.intent_pending, script.intent_reply.clone()),
            None => return Err(RaceError::MissingIdentifier),
        };
        let polls = state.intent_polls.entry(n).or_insert(0);
        *polls += 1;
        if *polls <= pending {
            Ok(PollReply::Pending)
        } else {
            Ok(PollReply::Ready(reply))
        }
    }

    async fn submit_confirm(&self, _slot: SlotId, intent_id: &str) -> RaceResult<String> {
        let _guard = self.enter();
        self.confirms.fetch_add(1, Ordering::SeqCst);
        let n = Self::attempt_of(intent_id);
        let result = {
            let state = self.state.lock().unwrap();
            match state.by_attempt.get(&n) {
                Some(script) => copy_result(&script.confirm_submit),
                None => Err(RaceError::MissingIdentifier),
            }
        };
        result.map(|_| format!("confirm-{}", n))
    }

    async fn poll_confirm(&self, confirm_id: &str) -> RaceResult<PollReply<TerminalResponse>> {
        let _guard = self.enter();
        let n = Self::attempt_of(confirm_id);
        let mut state = self.state.lock().unwrap();
        let (pending, reply) = match state.by_attempt.get(&n) {
            Some(script) => (script.confirm_pending, script.confirm_reply.clone()),
            None => return Err(RaceError::MissingIdentifier),
        };
        let polls = state.confirm_polls.entry(n).or_insert(0);
        *polls += 1;
        if *polls <= pending {
            Ok(PollReply::Pending)
        } else {
            Ok(PollReply::Ready(reply))
        }
    }
}

// =============================================================================
// Session Check
// =============================================================================

/// Counts revalidations; optionally fails them.
#[derive(Default)]
pub struct CountingSessionCheck {
    calls: AtomicU32,
    failure: Mutex<Option<RaceError>>,
}

impl CountingSessionCheck {
    pub fn failing(err: RaceError) -> Self {
        CountingSessionCheck {
            calls: AtomicU32::new(0),
            failure: Mutex::new(Some(err)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionCheck for CountingSessionCheck {
    async fn revalidate(&self) -> RaceResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().unwrap().as_ref() {
            Some(err) => Err(copy_error(err)),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Lesson Source
// =============================================================================

/// Serves fixed pages, recording the queries it saw.
#[derive(Default)]
pub struct FakeCatalog {
    pub pages: Vec<LessonPage>,
    queries: Mutex<Vec<LessonQuery>>,
}

impl FakeCatalog {
    pub fn new(pages: Vec<LessonPage>) -> Self {
        FakeCatalog {
            pages,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<LessonQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl LessonSource for FakeCatalog {
    async fn query_lessons(&self, query: LessonQuery) -> RaceResult<LessonPage> {
        let index = query.page_no.saturating_sub(1) as usize;
        self.queries.lock().unwrap().push(query);
        Ok(self.pages.get(index).cloned().unwrap_or_default())
    }
}

// =============================================================================
// Time Source
// =============================================================================

/// Replays scripted samples in order; an optional call hangs forever.
pub struct ScriptedTimeSource {
    samples: Mutex<VecDeque<RaceResult<TimeDelta>>>,
    calls: AtomicU32,
    hang_on: Option<u32>,
}

impl ScriptedTimeSource {
    pub fn new(samples: Vec<RaceResult<TimeDelta>>) -> Self {
        ScriptedTimeSource {
            samples: Mutex::new(samples.into()),
            calls: AtomicU32::new(0),
            hang_on: None,
        }
    }

    /// A source whose every sample is `offset`.
    pub fn fixed(offset: TimeDelta, count: usize) -> Self {
        Self::new((0..count).map(|_| Ok(offset)).collect())
    }

    /// Makes the `call`-th sample (1-based) never answer.
    pub fn with_hang_on(mut self, call: u32) -> Self {
        self.hang_on = Some(call);
        self
    }
}

#[async_trait]
impl TimeSource for ScriptedTimeSource {
    async fn sample(&self) -> RaceResult<TimeDelta> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang_on == Some(call) {
            std::future::pending::<()>().await;
        }
        let next = self.samples.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(RaceError::Clock("no more samples".into())))
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}

// =============================================================================
// Observer
// =============================================================================

/// Records what the scheduler reported.
#[derive(Default)]
pub struct RecordingObserver {
    outcomes: Mutex<Vec<Outcome>>,
    waits: AtomicU32,
    races: Mutex<Vec<(Target, RaceReport)>>,
}

impl RecordingObserver {
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn waits(&self) -> u32 {
        self.waits.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.races.lock().unwrap().len()
    }

    pub fn races(&self) -> Vec<(Target, RaceReport)> {
        self.races.lock().unwrap().clone()
    }
}

impl RaceObserver for RecordingObserver {
    fn waiting(&self, _target: &Target, _remaining: Duration) {
        self.waits.fetch_add(1, Ordering::SeqCst);
    }

    fn attempt_finished(&self, report: &AttemptReport, _launched: u64) {
        self.outcomes.lock().unwrap().push(report.outcome.clone());
    }

    fn race_finished(&self, target: &Target, report: &RaceReport) {
        self.races.lock().unwrap().push((target.clone(), report.clone()));
    }
}

// =============================================================================
// Local HTTP Endpoint
// =============================================================================

/// Serves `body` with `status` to every connection; returns the base URL.
pub async fn serve_json(status: u16, body: &'static str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}

/// Accepts connections and never answers; returns the base URL.
pub async fn serve_silence() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    format!("http://{}", addr)
}
