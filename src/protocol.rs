//! Request/response envelopes exchanged between the page and the worker.
//!
//! A request is `{ "type": <kind>, "payload"?: ... }`; the reply echoes the
//! type with a `:response` suffix and carries either `items`, a bare
//! `success: true`, or `success: false` with an `error` string.
//!
//! The set of request kinds is closed: each [`RequestKind`] names exactly one
//! (collection, operation) pair, and anything else is a
//! [`ProtocolError::UnknownRequestType`].

use crate::storage::{Collection, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Suffix appended to a request type to form its response type.
pub const RESPONSE_SUFFIX: &str = ":response";

/// Gateway operation a request maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Every record in the collection.
    GetAll,
    /// Replace the collection's contents.
    SetAll,
    /// Insert one record.
    Add,
    /// Records whose date field equals the payload string.
    GetByDate,
}

/// Every request the worker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    GetGrowthIntentions,
    SetGrowthIntentions,
    AddGrowthIntention,
    GetGrowthIntention,
    GetMorningCheckIn,
    SetMorningCheckIn,
    GetMorningCheckIns,
    GetMiddayCheckIn,
    SetMiddayCheckIn,
    GetMiddayCheckIns,
    GetEveningReflection,
    SetEveningReflection,
    GetEveningReflections,
    GetWeeklyReview,
    SetWeeklyReview,
    GetWeeklyReviews,
    SetWeeklyReviews,
    GetMonthlyReview,
    SetMonthlyReview,
    GetMonthlyReviews,
}

impl RequestKind {
    pub const ALL: [RequestKind; 20] = [
        RequestKind::GetGrowthIntentions,
        RequestKind::SetGrowthIntentions,
        RequestKind::AddGrowthIntention,
        RequestKind::GetGrowthIntention,
        RequestKind::GetMorningCheckIn,
        RequestKind::SetMorningCheckIn,
        RequestKind::GetMorningCheckIns,
        RequestKind::GetMiddayCheckIn,
        RequestKind::SetMiddayCheckIn,
        RequestKind::GetMiddayCheckIns,
        RequestKind::GetEveningReflection,
        RequestKind::SetEveningReflection,
        RequestKind::GetEveningReflections,
        RequestKind::GetWeeklyReview,
        RequestKind::SetWeeklyReview,
        RequestKind::GetWeeklyReviews,
        RequestKind::SetWeeklyReviews,
        RequestKind::GetMonthlyReview,
        RequestKind::SetMonthlyReview,
        RequestKind::GetMonthlyReviews,
    ];

    /// Wire name of the request.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::GetGrowthIntentions => "get-growth-intentions",
            RequestKind::SetGrowthIntentions => "set-growth-intentions",
            RequestKind::AddGrowthIntention => "add-growth-intention",
            RequestKind::GetGrowthIntention => "get-growth-intention",
            RequestKind::GetMorningCheckIn => "get-morning-checkin",
            RequestKind::SetMorningCheckIn => "set-morning-checkin",
            RequestKind::GetMorningCheckIns => "get-morning-checkins",
            RequestKind::GetMiddayCheckIn => "get-midday-checkin",
            RequestKind::SetMiddayCheckIn => "set-midday-checkin",
            RequestKind::GetMiddayCheckIns => "get-midday-checkins",
            RequestKind::GetEveningReflection => "get-evening-reflection",
            RequestKind::SetEveningReflection => "set-evening-reflection",
            RequestKind::GetEveningReflections => "get-evening-reflections",
            RequestKind::GetWeeklyReview => "get-weekly-review",
            RequestKind::SetWeeklyReview => "set-weekly-review",
            RequestKind::GetWeeklyReviews => "get-weekly-reviews",
            RequestKind::SetWeeklyReviews => "set-weekly-reviews",
            RequestKind::GetMonthlyReview => "get-monthly-review",
            RequestKind::SetMonthlyReview => "set-monthly-review",
            RequestKind::GetMonthlyReviews => "get-monthly-reviews",
        }
    }

    /// The collection and gateway operation this request resolves to.
    pub fn route(self) -> (Collection, Operation) {
        use Collection::*;
        use Operation::*;

        match self {
            RequestKind::GetGrowthIntentions => (Intentions, GetAll),
            RequestKind::SetGrowthIntentions => (Intentions, SetAll),
            RequestKind::AddGrowthIntention => (Intentions, Add),
            RequestKind::GetGrowthIntention => (Intentions, GetByDate),
            RequestKind::GetMorningCheckIn => (Morning, GetByDate),
            RequestKind::SetMorningCheckIn => (Morning, Add),
            RequestKind::GetMorningCheckIns => (Morning, GetAll),
            RequestKind::GetMiddayCheckIn => (Midday, GetByDate),
            RequestKind::SetMiddayCheckIn => (Midday, Add),
            RequestKind::GetMiddayCheckIns => (Midday, GetAll),
            RequestKind::GetEveningReflection => (Evening, GetByDate),
            RequestKind::SetEveningReflection => (Evening, Add),
            RequestKind::GetEveningReflections => (Evening, GetAll),
            RequestKind::GetWeeklyReview => (Weekly, GetByDate),
            RequestKind::SetWeeklyReview => (Weekly, Add),
            RequestKind::GetWeeklyReviews => (Weekly, GetAll),
            RequestKind::SetWeeklyReviews => (Weekly, SetAll),
            RequestKind::GetMonthlyReview => (Monthly, GetByDate),
            RequestKind::SetMonthlyReview => (Monthly, Add),
            RequestKind::GetMonthlyReviews => (Monthly, GetAll),
        }
    }

    /// Type string the worker replies with.
    pub fn response_type(self) -> String {
        format!("{}{}", self.as_str(), RESPONSE_SUFFIX)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownRequestType(s.to_string()))
    }
}

/// Errors in interpreting an envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown request type: {0}")]
    UnknownRequestType(String),
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Page → worker message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl RequestEnvelope {
    pub fn new(kind: RequestKind, payload: Option<Value>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            payload,
        }
    }

    /// Reads an inbound message.
    ///
    /// Anything without a string `type` is malformed; such messages have no
    /// reply address and are dropped by the worker.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut map) = value else {
            return Err(ProtocolError::Malformed("not an object".to_string()));
        };
        let kind = match map.remove("type") {
            Some(Value::String(kind)) => kind,
            Some(_) => return Err(ProtocolError::Malformed("type is not a string".to_string())),
            None => return Err(ProtocolError::Malformed("missing type".to_string())),
        };
        Ok(Self {
            kind,
            payload: map.remove("payload"),
        })
    }

    pub fn request_kind(&self) -> Result<RequestKind, ProtocolError> {
        self.kind.parse()
    }

    /// Payload as a record sequence; anything not array-shaped is empty.
    ///
    /// Elements that are not objects make the whole payload invalid.
    pub fn records_payload(&self) -> Result<Vec<Record>, ProtocolError> {
        match &self.payload {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    item.as_object().cloned().ok_or_else(|| {
                        ProtocolError::Malformed(format!("payload[{}] is not a record", i))
                    })
                })
                .collect(),
            _ => Ok(Vec::new()),
        }
    }

    /// Payload as a single record; anything not object-shaped is empty.
    pub fn record_payload(&self) -> Record {
        match &self.payload {
            Some(Value::Object(map)) => map.clone(),
            _ => Record::new(),
        }
    }

    /// Payload as a date string, if it is one.
    pub fn date_payload(&self) -> Option<&str> {
        self.payload.as_ref().and_then(Value::as_str)
    }
}

/// Worker → page message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Record>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Successful read.
    pub fn items(request_type: &str, items: Vec<Record>) -> Self {
        Self {
            kind: format!("{}{}", request_type, RESPONSE_SUFFIX),
            success: true,
            items: Some(items),
            error: None,
        }
    }

    /// Successful write.
    pub fn ok(request_type: &str) -> Self {
        Self {
            kind: format!("{}{}", request_type, RESPONSE_SUFFIX),
            success: true,
            items: None,
            error: None,
        }
    }

    pub fn failure(request_type: &str, error: impl ToString) -> Self {
        Self {
            kind: format!("{}{}", request_type, RESPONSE_SUFFIX),
            success: false,
            items: None,
            error: Some(error.to_string()),
        }
    }
}
