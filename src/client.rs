//! Page-side data proxy.
//!
//! [`JournalClient`] is the only thing application code calls for
//! persistence. Each method builds one request envelope, sends it to the
//! worker over a fresh channel, and waits for exactly one reply.

use crate::journal::{
    self, DashboardAnalytics, EveningReflection, GrowthIntention, JournalEntry, JournalSnapshot,
    MiddayCheckIn, MonthlyReview, MorningCheckIn, WeeklyReview,
};
use crate::protocol::{RequestEnvelope, RequestKind, ResponseEnvelope};
use crate::storage::ID_FIELD;
use crate::time;
use crate::transport::{ChannelTransport, TransportError, WorkerLink};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use web_time::Instant;

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long to wait for the worker's reply before giving up.
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
        }
    }
}

impl ClientConfig {
    #[cfg(target_arch = "wasm32")]
    const STORAGE_KEY: &'static str = "journal_client_config";

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Loads overrides from localStorage, falling back to defaults.
    #[cfg(target_arch = "wasm32")]
    pub fn load() -> Self {
        let Some(storage) = web_sys::window().and_then(|w| w.local_storage().ok().flatten()) else {
            return Self::default();
        };
        let Ok(Some(json)) = storage.get_item(Self::STORAGE_KEY) else {
            return Self::default();
        };

        match serde_json::from_str(&json) {
            Ok(config) => {
                log::info!("Loaded client config from localStorage");
                config
            }
            Err(e) => {
                log::warn!("Ignoring stored client config: {}", e);
                Self::default()
            }
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn load() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("no reply to {request} before the deadline")]
    TimedOut { request: String },
    #[error("worker closed the reply channel")]
    ChannelClosed,
    #[error("worker reported: {0}")]
    Remote(String),
    #[error("could not decode reply: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

/// Typed facade over the worker protocol.
pub struct JournalClient<L> {
    link: L,
    transport: ChannelTransport,
    config: ClientConfig,
}

impl<L: WorkerLink> JournalClient<L> {
    /// Uses the best channel strategy the host offers.
    pub fn new(link: L, config: ClientConfig) -> Self {
        Self::with_transport(link, ChannelTransport::detect(), config)
    }

    pub fn with_transport(link: L, transport: ChannelTransport, config: ClientConfig) -> Self {
        Self {
            link,
            transport,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // Growth intentions

    pub async fn growth_intentions(&self) -> Result<Vec<GrowthIntention>, ClientError> {
        self.list(RequestKind::GetGrowthIntentions).await
    }

    pub async fn growth_intention(&self, date: &str) -> Result<Option<GrowthIntention>, ClientError> {
        self.lookup(RequestKind::GetGrowthIntention, date).await
    }

    pub async fn add_growth_intention(&self, intention: &GrowthIntention) -> Result<bool, ClientError> {
        self.store(RequestKind::AddGrowthIntention, None, intention).await
    }

    /// Replaces every stored intention, e.g. when seeding defaults.
    pub async fn replace_growth_intentions(
        &self,
        intentions: &[GrowthIntention],
    ) -> Result<bool, ClientError> {
        self.replace(RequestKind::SetGrowthIntentions, intentions).await
    }

    // Daily check-ins

    pub async fn morning_checkin(&self, date: &str) -> Result<Option<MorningCheckIn>, ClientError> {
        self.lookup(RequestKind::GetMorningCheckIn, date).await
    }

    pub async fn set_morning_checkin(
        &self,
        date: &str,
        checkin: &MorningCheckIn,
    ) -> Result<bool, ClientError> {
        self.store(RequestKind::SetMorningCheckIn, Some(date), checkin).await
    }

    pub async fn morning_checkins(&self) -> Result<Vec<MorningCheckIn>, ClientError> {
        self.list(RequestKind::GetMorningCheckIns).await
    }

    pub async fn midday_checkin(&self, date: &str) -> Result<Option<MiddayCheckIn>, ClientError> {
        self.lookup(RequestKind::GetMiddayCheckIn, date).await
    }

    pub async fn set_midday_checkin(
        &self,
        date: &str,
        checkin: &MiddayCheckIn,
    ) -> Result<bool, ClientError> {
        self.store(RequestKind::SetMiddayCheckIn, Some(date), checkin).await
    }

    pub async fn midday_checkins(&self) -> Result<Vec<MiddayCheckIn>, ClientError> {
        self.list(RequestKind::GetMiddayCheckIns).await
    }

    pub async fn evening_reflection(
        &self,
        date: &str,
    ) -> Result<Option<EveningReflection>, ClientError> {
        self.lookup(RequestKind::GetEveningReflection, date).await
    }

    pub async fn set_evening_reflection(
        &self,
        date: &str,
        reflection: &EveningReflection,
    ) -> Result<bool, ClientError> {
        self.store(RequestKind::SetEveningReflection, Some(date), reflection)
            .await
    }

    pub async fn evening_reflections(&self) -> Result<Vec<EveningReflection>, ClientError> {
        self.list(RequestKind::GetEveningReflections).await
    }

    // Reviews

    pub async fn weekly_review(&self, week_of: &str) -> Result<Option<WeeklyReview>, ClientError> {
        self.lookup(RequestKind::GetWeeklyReview, week_of).await
    }

    pub async fn set_weekly_review(
        &self,
        week_of: &str,
        review: &WeeklyReview,
    ) -> Result<bool, ClientError> {
        self.store(RequestKind::SetWeeklyReview, Some(week_of), review).await
    }

    pub async fn weekly_reviews(&self) -> Result<Vec<WeeklyReview>, ClientError> {
        self.list(RequestKind::GetWeeklyReviews).await
    }

    pub async fn replace_weekly_reviews(&self, reviews: &[WeeklyReview]) -> Result<bool, ClientError> {
        self.replace(RequestKind::SetWeeklyReviews, reviews).await
    }

    pub async fn monthly_review(&self, date: &str) -> Result<Option<MonthlyReview>, ClientError> {
        self.lookup(RequestKind::GetMonthlyReview, date).await
    }

    pub async fn set_monthly_review(
        &self,
        date: &str,
        review: &MonthlyReview,
    ) -> Result<bool, ClientError> {
        self.store(RequestKind::SetMonthlyReview, Some(date), review).await
    }

    pub async fn monthly_reviews(&self) -> Result<Vec<MonthlyReview>, ClientError> {
        self.list(RequestKind::GetMonthlyReviews).await
    }

    /// Summary for the dashboard, with the streak measured up to `today`.
    pub async fn dashboard_analytics(&self, today: NaiveDate) -> Result<DashboardAnalytics, ClientError> {
        let snapshot = JournalSnapshot {
            intentions: self.growth_intentions().await?,
            morning: self.morning_checkins().await?,
            midday: self.midday_checkins().await?,
            evening: self.evening_reflections().await?,
            weekly: self.weekly_reviews().await?,
            monthly: self.monthly_reviews().await?,
        };
        Ok(DashboardAnalytics::compute(&snapshot, today))
    }

    async fn lookup<T: JournalEntry>(
        &self,
        kind: RequestKind,
        date: &str,
    ) -> Result<Option<T>, ClientError> {
        let items = self
            .request(kind, Some(Value::String(date.to_string())))
            .await?
            .items
            .unwrap_or_default();

        // Several entries can share a date; the latest one wins.
        items
            .into_iter()
            .max_by_key(|record| record.get(ID_FIELD).and_then(Value::as_u64))
            .map(journal::from_record)
            .transpose()
            .map_err(ClientError::from)
    }

    async fn list<T: JournalEntry>(&self, kind: RequestKind) -> Result<Vec<T>, ClientError> {
        self.request(kind, None)
            .await?
            .items
            .unwrap_or_default()
            .into_iter()
            .map(|record| journal::from_record(record).map_err(ClientError::from))
            .collect()
    }

    async fn store<T: JournalEntry>(
        &self,
        kind: RequestKind,
        date: Option<&str>,
        entry: &T,
    ) -> Result<bool, ClientError> {
        let mut record = journal::to_record(entry)?;
        if let Some(date) = date {
            record.insert(
                T::COLLECTION.date_field().to_string(),
                Value::String(date.to_string()),
            );
        }
        let response = self.request(kind, Some(Value::Object(record))).await?;
        Ok(response.success)
    }

    async fn replace<T: JournalEntry>(
        &self,
        kind: RequestKind,
        entries: &[T],
    ) -> Result<bool, ClientError> {
        let records = entries
            .iter()
            .map(|entry| journal::to_record(entry).map(Value::Object))
            .collect::<Result<Vec<_>, _>>()?;
        let response = self.request(kind, Some(Value::Array(records))).await?;
        Ok(response.success)
    }

    async fn request(
        &self,
        kind: RequestKind,
        payload: Option<Value>,
    ) -> Result<ResponseEnvelope, ClientError> {
        let (mut reply, remote) = self.transport.create()?;
        let message = serde_json::to_value(RequestEnvelope::new(kind, payload))?;

        let started = Instant::now();
        self.link.dispatch(message, remote)?;

        let raw = time::timeout(self.config.request_timeout(), reply.recv())
            .await
            .map_err(|_| {
                log::warn!("{} timed out after {:?}", kind, self.config.request_timeout());
                ClientError::TimedOut {
                    request: kind.to_string(),
                }
            })?
            .ok_or(ClientError::ChannelClosed)?;
        log::debug!("{} answered in {:?}", kind, started.elapsed());

        let response: ResponseEnvelope = serde_json::from_value(raw)?;
        if response.kind != kind.response_type() {
            return Err(ClientError::Decode(format!(
                "expected {}, got {}",
                kind.response_type(),
                response.kind
            )));
        }
        if !response.success {
            return Err(ClientError::Remote(response.error.unwrap_or_default()));
        }
        Ok(response)
    }
}
