//! Dashboard summary over every collection.

use super::entries::{
    EveningReflection, GrowthIntention, MiddayCheckIn, MonthlyReview, MorningCheckIn, WeeklyReview,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Everything the dashboard shows, computed client-side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardAnalytics {
    pub growth_intentions: usize,
    pub morning_checkins: usize,
    pub midday_checkins: usize,
    pub evening_reflections: usize,
    pub weekly_reviews: usize,
    pub monthly_reviews: usize,
    /// Distinct days with at least one daily entry.
    pub journaled_days: usize,
    /// Consecutive journaled days ending today, or yesterday when today has
    /// nothing yet.
    pub current_streak: u32,
    pub average_energy: Option<f64>,
}

/// Every entry the analytics are computed from.
#[derive(Debug, Clone, Default)]
pub struct JournalSnapshot {
    pub intentions: Vec<GrowthIntention>,
    pub morning: Vec<MorningCheckIn>,
    pub midday: Vec<MiddayCheckIn>,
    pub evening: Vec<EveningReflection>,
    pub weekly: Vec<WeeklyReview>,
    pub monthly: Vec<MonthlyReview>,
}

impl DashboardAnalytics {
    pub fn compute(snapshot: &JournalSnapshot, today: NaiveDate) -> Self {
        // Unparseable dates are skipped rather than failing the dashboard.
        let days: BTreeSet<NaiveDate> = snapshot
            .morning
            .iter()
            .map(|e| e.date.as_str())
            .chain(snapshot.midday.iter().map(|e| e.date.as_str()))
            .chain(snapshot.evening.iter().map(|e| e.date.as_str()))
            .filter_map(|date| NaiveDate::parse_from_str(date, DATE_FORMAT).ok())
            .collect();

        let energies: Vec<u32> = snapshot
            .midday
            .iter()
            .filter_map(|e| e.energy_level)
            .collect();
        let average_energy = if energies.is_empty() {
            None
        } else {
            Some(energies.iter().map(|&e| f64::from(e)).sum::<f64>() / energies.len() as f64)
        };

        Self {
            growth_intentions: snapshot.intentions.len(),
            morning_checkins: snapshot.morning.len(),
            midday_checkins: snapshot.midday.len(),
            evening_reflections: snapshot.evening.len(),
            weekly_reviews: snapshot.weekly.len(),
            monthly_reviews: snapshot.monthly.len(),
            journaled_days: days.len(),
            current_streak: streak_ending(&days, today),
            average_energy,
        }
    }
}

fn streak_ending(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut cursor = if days.contains(&today) {
        Some(today)
    } else {
        today.pred_opt()
    };

    let mut streak = 0;
    while let Some(day) = cursor.filter(|day| days.contains(day)) {
        streak += 1;
        cursor = day.pred_opt();
    }
    streak
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn morning(date: &str) -> MorningCheckIn {
        MorningCheckIn {
            date: date.to_string(),
            ..Default::default()
        }
    }

    fn midday(date: &str, energy: Option<u32>) -> MiddayCheckIn {
        MiddayCheckIn {
            date: date.to_string(),
            energy_level: energy,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_journal() {
        let analytics = DashboardAnalytics::compute(&JournalSnapshot::default(), day("2024-03-01"));
        assert_eq!(analytics, DashboardAnalytics::default());
    }

    #[test]
    fn test_streak_counts_any_daily_entry() {
        let snapshot = JournalSnapshot {
            morning: vec![morning("2024-03-01"), morning("2024-02-28")],
            midday: vec![midday("2024-02-29", None)],
            evening: vec![EveningReflection {
                date: "2024-02-26".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let analytics = DashboardAnalytics::compute(&snapshot, day("2024-03-01"));
        assert_eq!(analytics.current_streak, 3);
        assert_eq!(analytics.journaled_days, 4);
    }

    #[test]
    fn test_streak_survives_until_today_is_logged() {
        let snapshot = JournalSnapshot {
            morning: vec![morning("2024-01-01"), morning("2024-01-02")],
            ..Default::default()
        };

        assert_eq!(
            DashboardAnalytics::compute(&snapshot, day("2024-01-03")).current_streak,
            2
        );
        assert_eq!(
            DashboardAnalytics::compute(&snapshot, day("2024-01-04")).current_streak,
            0
        );
    }

    #[test]
    fn test_counts_and_average_energy() {
        let snapshot = JournalSnapshot {
            intentions: vec![GrowthIntention::default()],
            midday: vec![
                midday("2024-01-01", Some(4)),
                midday("2024-01-01", Some(7)),
                midday("not a date", None),
            ],
            weekly: vec![WeeklyReview::default(), WeeklyReview::default()],
            ..Default::default()
        };

        let analytics = DashboardAnalytics::compute(&snapshot, day("2024-01-01"));
        assert_eq!(analytics.growth_intentions, 1);
        assert_eq!(analytics.midday_checkins, 3);
        assert_eq!(analytics.weekly_reviews, 2);
        assert_eq!(analytics.journaled_days, 1);
        assert_eq!(analytics.average_energy, Some(5.5));
    }
}
