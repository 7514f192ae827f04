//! # Enrollment API Client
//!
//! The seams between the race engine and the service.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  AcquisitionWorkflow ──► EnrollmentApi ──┐                              │
//! │  Catalog             ──► LessonSource  ──┼──► HttpEnrollmentApi         │
//! │  TargetRunner        ──► SessionCheck  ──┘      │                       │
//! │                                                 │ RwLock<Arc<Session>>  │
//! │                                                 ▼                       │
//! │                                   snapshot per call, swapped only by    │
//! │                                   SessionCheck::revalidate              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, trace};

use grab_core::SlotId;

use crate::api::{
    request_id_of, ConfirmResult, Envelope, IntentResult, LessonPage, LessonQuery,
    SelectionRequest, TerminalResponse,
};
use crate::config::ServiceSettings;
use crate::error::{RaceError, RaceResult};
use crate::poll::PollReply;
use crate::session::Session;

// =============================================================================
// Traits
// =============================================================================

/// The four calls of one acquisition attempt.
#[async_trait]
pub trait EnrollmentApi: Send + Sync + 'static {
    /// Submits an intent for `slot`, returning the intent id.
    async fn submit_intent(&self, slot: SlotId) -> RaceResult<String>;

    async fn poll_intent(&self, intent_id: &str) -> RaceResult<PollReply<TerminalResponse>>;

    /// Submits the binding request following intent `intent_id`.
    async fn submit_confirm(&self, slot: SlotId, intent_id: &str) -> RaceResult<String>;

    async fn poll_confirm(&self, confirm_id: &str) -> RaceResult<PollReply<TerminalResponse>>;
}

/// Between-race session sanity check.
#[async_trait]
pub trait SessionCheck: Send + Sync {
    async fn revalidate(&self) -> RaceResult<()>;
}

/// Paged lesson catalog.
#[async_trait]
pub trait LessonSource: Send + Sync {
    async fn query_lessons(&self, query: LessonQuery) -> RaceResult<LessonPage>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// `reqwest`-backed implementation of every seam.
pub struct HttpEnrollmentApi {
    session: RwLock<Arc<Session>>,
    settings: ServiceSettings,
}

impl HttpEnrollmentApi {
    pub fn new(session: Session, settings: ServiceSettings) -> Self {
        HttpEnrollmentApi {
            session: RwLock::new(Arc::new(session)),
            settings,
        }
    }

    /// The current session handle.
    pub async fn snapshot(&self) -> Arc<Session> {
        self.session.read().await.clone()
    }

    async fn post<B, T>(&self, session: &Session, path: &str, body: &B) -> RaceResult<Option<T>>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = session.url(path);
        trace!(url = %url, "POST");
        let limit = self.settings.request_timeout();
        let request = session.client().post(&url).timeout(limit).json(body);
        fetch_envelope::<T>(request, limit).await?.into_data()
    }

    async fn get<T>(&self, session: &Session, path: &str) -> RaceResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let url = session.url(path);
        trace!(url = %url, "GET");
        let limit = self.settings.request_timeout();
        let request = session.client().get(&url).timeout(limit);
        fetch_envelope::<T>(request, limit).await?.into_data()
    }
}

/// Sends `request` and decodes the `{result, message, data}` envelope.
pub(crate) async fn fetch_envelope<T>(request: RequestBuilder, limit: Duration) -> RaceResult<Envelope<T>>
where
    T: DeserializeOwned,
{
    let http = move |e: reqwest::Error| RaceError::http(e, limit);
    request
        .send()
        .await
        .map_err(http)?
        .error_for_status()
        .map_err(http)?
        .json()
        .await
        .map_err(http)
}

#[async_trait]
impl EnrollmentApi for HttpEnrollmentApi {
    async fn submit_intent(&self, slot: SlotId) -> RaceResult<String> {
        let session = self.snapshot().await;
        let body = SelectionRequest::intent(session.student(), session.turn().turn_id, slot);
        let data: Option<Value> = self.post(&session, "add-predicate", &body).await?;
        request_id_of(data)
    }

    async fn poll_intent(&self, intent_id: &str) -> RaceResult<PollReply<TerminalResponse>> {
        let session = self.snapshot().await;
        let path = format!("predicate-response/{}/{}", session.credentials().student_id, intent_id);
        let data: Option<IntentResult> = self.get(&session, &path).await?;
        Ok(match data {
            Some(result) => PollReply::Ready(TerminalResponse::from_intent(&result)),
            None => PollReply::Pending,
        })
    }

    async fn submit_confirm(&self, slot: SlotId, intent_id: &str) -> RaceResult<String> {
        // The binding request is keyed by slot; the intent id only orders it.
        trace!(intent_id, "Confirming after intent");
        let session = self.snapshot().await;
        let body = SelectionRequest::confirm(session.student(), session.turn().turn_id, slot);
        let data: Option<Value> = self.post(&session, "add-request", &body).await?;
        request_id_of(data)
    }

    async fn poll_confirm(&self, confirm_id: &str) -> RaceResult<PollReply<TerminalResponse>> {
        let session = self.snapshot().await;
        let path = format!("add-drop-response/{}/{}", session.credentials().student_id, confirm_id);
        let data: Option<ConfirmResult> = self.get(&session, &path).await?;
        Ok(match data {
            Some(result) if result.is_terminal() => {
                PollReply::Ready(TerminalResponse::from_confirm(&result))
            }
            _ => PollReply::Pending,
        })
    }
}

#[async_trait]
impl SessionCheck for HttpEnrollmentApi {
    async fn revalidate(&self) -> RaceResult<()> {
        let current = self.snapshot().await;
        let fresh = current.refreshed(&self.settings).await?;
        info!(turn_id = fresh.turn().turn_id, "Session revalidated");
        *self.session.write().await = Arc::new(fresh);
        Ok(())
    }
}

#[async_trait]
impl LessonSource for HttpEnrollmentApi {
    async fn query_lessons(&self, mut query: LessonQuery) -> RaceResult<LessonPage> {
        let session = self.snapshot().await;
        let turn = session.turn();
        query.turn_id = turn.turn_id;
        query.semester_id = turn.semester_id;
        query.student_id = session.student();

        let path = format!("query-lesson/{}/{}", session.credentials().student_id, turn.turn_id);
        let page: Option<LessonPage> = self.post(&session, &path, &query).await?;
        let page = page.ok_or_else(|| RaceError::Rejected {
            code: 0,
            message: "empty lesson page".into(),
        })?;
        debug!(
            page = query.page_no,
            lessons = page.lessons.len(),
            total_rows = page.page_info.total_rows.unwrap_or(0),
            "Lesson page"
        );
        Ok(page)
    }
}
