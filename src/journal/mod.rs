//! Journal entities as application code sees them.

mod analytics;
mod entries;

pub use analytics::{DashboardAnalytics, JournalSnapshot};
pub use entries::{
    from_record, to_record, EveningReflection, GrowthIntention, JournalEntry, MiddayCheckIn,
    MonthlyReview, MorningCheckIn, WeeklyReview,
};
