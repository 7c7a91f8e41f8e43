//! Typed views of the records in each collection.
//!
//! Fields the app does not model are kept in `extra` so a record read back
//! and written again loses nothing.

use crate::storage::{Collection, Record, RecordId};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An entry stored in one fixed collection.
///
/// Its date lives under `COLLECTION.date_field()` in the stored record.
pub trait JournalEntry: Serialize + for<'de> Deserialize<'de> {
    const COLLECTION: Collection;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthIntention {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub intention: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_area: Option<String>,
    #[serde(flatten)]
    pub extra: Record,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MorningCheckIn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub intention: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_value: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub energy_level: Option<u32>,
    #[serde(flatten)]
    pub extra: Record,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiddayCheckIn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub date: String,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub energy_level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Record,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EveningReflection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub date: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wins: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lessons: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gratitude: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub rating: Option<u32>,
    #[serde(flatten)]
    pub extra: Record,
}

/// Weekly reviews are keyed by the first day of the week.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub week_of: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlights: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenges: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_focus: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub score: Option<u32>,
    #[serde(flatten)]
    pub extra: Record,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyReview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlights: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub growth_areas: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub score: Option<u32>,
    #[serde(flatten)]
    pub extra: Record,
}

macro_rules! journal_entry {
    ($ty:ty, $collection:expr) => {
        impl JournalEntry for $ty {
            const COLLECTION: Collection = $collection;
        }
    };
}

journal_entry!(GrowthIntention, Collection::Intentions);
journal_entry!(MorningCheckIn, Collection::Morning);
journal_entry!(MiddayCheckIn, Collection::Midday);
journal_entry!(EveningReflection, Collection::Evening);
journal_entry!(WeeklyReview, Collection::Weekly);
journal_entry!(MonthlyReview, Collection::Monthly);

/// Accepts `7`, `"7"` or `null`. Form inputs hand numbers over as strings.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("expected a non-negative integer, got {}", n))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("expected a numeric string, got {:?}", s))),
        Some(other) => Err(de::Error::custom(format!(
            "expected a number or numeric string, got {}",
            other
        ))),
    }
}

/// Converts an entry into the record shape the gateway stores.
pub fn to_record<T: JournalEntry>(entry: &T) -> Result<Record, serde_json::Error> {
    match serde_json::to_value(entry)? {
        Value::Object(record) => Ok(record),
        other => Err(serde::ser::Error::custom(format!(
            "{} entry did not serialize to an object: {}",
            T::COLLECTION,
            other
        ))),
    }
}

pub fn from_record<T: JournalEntry>(record: Record) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_numeric_strings_are_coerced() {
        let entry: MiddayCheckIn = from_record(record(json!({
            "id": 3,
            "date": "2024-01-01",
            "energy_level": "7",
            "mood": "calm"
        })))
        .unwrap();

        assert_eq!(entry.id, Some(3));
        assert_eq!(entry.energy_level, Some(7));
        assert_eq!(entry.mood.as_deref(), Some("calm"));
    }

    #[test]
    fn test_non_numeric_string_is_rejected() {
        let result = from_record::<EveningReflection>(record(json!({
            "date": "2024-01-01",
            "rating": "great"
        })));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_string_means_unset() {
        let entry: WeeklyReview =
            from_record(record(json!({"week_of": "2024-01-08", "score": ""}))).unwrap();
        assert_eq!(entry.score, None);
        assert_eq!(entry.week_of, "2024-01-08");
    }

    #[test]
    fn test_date_is_stored_under_collection_date_field() {
        let weekly = to_record(&WeeklyReview {
            week_of: "2024-01-08".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            weekly.get(WeeklyReview::COLLECTION.date_field()),
            Some(&json!("2024-01-08"))
        );

        let monthly = to_record(&MonthlyReview {
            date: "2024-01-01".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            monthly.get(MonthlyReview::COLLECTION.date_field()),
            Some(&json!("2024-01-01"))
        );
    }

    #[test]
    fn test_unknown_fields_survive() {
        let stored = record(json!({
            "id": 1,
            "date": "2024-01-01",
            "intention": "meditate",
            "core_value": "focus",
            "mood_color": "blue"
        }));
        let entry: MorningCheckIn = from_record(stored.clone()).unwrap();
        assert_eq!(entry.extra.get("mood_color"), Some(&json!("blue")));
        assert_eq!(to_record(&entry).unwrap(), stored);
    }

    #[test]
    fn test_unset_fields_are_omitted() {
        let entry = GrowthIntention {
            date: "2024-01-01".to_string(),
            intention: "read daily".to_string(),
            ..Default::default()
        };
        assert_eq!(
            Value::Object(to_record(&entry).unwrap()),
            json!({"date": "2024-01-01", "intention": "read daily"})
        );
    }
}
