//! Notification cohorts, relative time labels and the unread badge.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{Notification, NotificationKind};

pub const BADGE_CAP: usize = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cohort {
    Today,
    Yesterday,
    Week,
    Earlier,
}

impl Cohort {
    pub const ALL: [Cohort; 4] = [Cohort::Today, Cohort::Yesterday, Cohort::Week, Cohort::Earlier];

    pub fn title(&self) -> &'static str {
        match self {
            Cohort::Today => "Today",
            Cohort::Yesterday => "Yesterday",
            Cohort::Week => "This Week",
            Cohort::Earlier => "Earlier",
        }
    }

    /// Buckets a timestamp by calendar-day distance from `now` in `now`'s zone.
    pub fn of<Tz: TimeZone>(created_at: &DateTime<Utc>, now: &DateTime<Tz>) -> Cohort {
        let today = now.date_naive();
        let day = created_at.with_timezone(&now.timezone()).date_naive();
        match (today - day).num_days() {
            i64::MIN..=0 => Cohort::Today,
            1 => Cohort::Yesterday,
            2..=7 => Cohort::Week,
            _ => Cohort::Earlier,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cohorts {
    pub today: Vec<Notification>,
    pub yesterday: Vec<Notification>,
    pub week: Vec<Notification>,
    pub earlier: Vec<Notification>,
}

impl Cohorts {
    pub fn get(&self, cohort: Cohort) -> &[Notification] {
        match cohort {
            Cohort::Today => &self.today,
            Cohort::Yesterday => &self.yesterday,
            Cohort::Week => &self.week,
            Cohort::Earlier => &self.earlier,
        }
    }

    fn get_mut(&mut self, cohort: Cohort) -> &mut Vec<Notification> {
        match cohort {
            Cohort::Today => &mut self.today,
            Cohort::Yesterday => &mut self.yesterday,
            Cohort::Week => &mut self.week,
            Cohort::Earlier => &mut self.earlier,
        }
    }

    pub fn len(&self) -> usize {
        Cohort::ALL.iter().map(|c| self.get(*c).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-empty cohorts in display order.
    pub fn sections(&self) -> impl Iterator<Item = (Cohort, &[Notification])> {
        Cohort::ALL
            .into_iter()
            .map(move |cohort| (cohort, self.get(cohort)))
            .filter(|(_, items)| !items.is_empty())
    }
}

/// Splits notifications into cohorts. Input order is kept inside each cohort.
pub fn group_by_cohort<Tz: TimeZone>(items: &[Notification], now: &DateTime<Tz>) -> Cohorts {
    let mut cohorts = Cohorts::default();
    for item in items {
        cohorts
            .get_mut(Cohort::of(&item.created_at, now))
            .push(item.clone());
    }
    cohorts
}

pub fn time_ago<Tz: TimeZone>(created_at: &DateTime<Utc>, now: &DateTime<Tz>) -> String {
    let secs = now
        .with_timezone(&Utc)
        .signed_duration_since(*created_at)
        .num_seconds()
        .max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        86_400..=172_799 => "Yesterday".to_string(),
        _ => created_at
            .with_timezone(&now.timezone())
            .date_naive()
            .format("%Y-%m-%d")
            .to_string(),
    }
}

pub fn icon(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Like => "❤️",
        NotificationKind::Comment => "💬",
        NotificationKind::Reply => "↩️",
        NotificationKind::Follow => "👤",
        NotificationKind::Other => "🔔",
    }
}

pub fn unread_count(items: &[Notification]) -> usize {
    items.iter().filter(|item| !item.read).count()
}

/// Text for the unread badge; `None` hides it.
pub fn badge_label(unread: usize) -> Option<String> {
    match unread {
        0 => None,
        n if n > BADGE_CAP => Some(format!("{BADGE_CAP}+")),
        n => Some(n.to_string()),
    }
}

/// When opening the notifications view marks everything read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkReadPolicy {
    /// Mark all read as soon as the view opens, before the list loads.
    #[default]
    Always,
    /// Mark all read once the list has loaded.
    OnSuccess,
    Never,
}

/// The notification list shown in the notifications tab.
#[derive(Debug, Clone, Default)]
pub struct Inbox {
    items: Vec<Notification>,
    unread: usize,
    pub selected: usize,
}

impl Inbox {
    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn replace(&mut self, items: Vec<Notification>) {
        self.unread = unread_count(&items);
        self.items = items;
        self.selected = self.selected.min(self.items.len().saturating_sub(1));
    }

    /// Sets the unread count from a background poll without touching the list.
    pub fn set_unread(&mut self, unread: usize) {
        self.unread = unread;
    }

    pub fn unread(&self) -> usize {
        self.unread
    }

    pub fn badge(&self) -> Option<String> {
        badge_label(self.unread)
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            return false;
        };
        if !item.read {
            item.read = true;
            self.unread = self.unread.saturating_sub(1);
        }
        true
    }

    pub fn mark_all_read(&mut self) {
        for item in self.items.iter_mut() {
            item.read = true;
        }
        self.unread = 0;
    }

    /// Notifications in display order: cohort by cohort.
    pub fn ordered<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Vec<Notification> {
        let cohorts = group_by_cohort(&self.items, now);
        cohorts
            .sections()
            .flat_map(|(_, items)| items.iter().cloned())
            .collect()
    }

    pub fn move_selection(&mut self, delta: i32) {
        if self.items.is_empty() {
            self.selected = 0;
            return;
        }
        let max = self.items.len() as i64 - 1;
        self.selected = (self.selected as i64 + delta as i64).clamp(0, max) as usize;
    }

    pub fn selected<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<Notification> {
        self.ordered(now).get(self.selected).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock_notification;
    use chrono::{Duration, FixedOffset};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn at(now: DateTime<Utc>, offset: Duration) -> Notification {
        mock_notification("n", NotificationKind::Like, "m", now - offset)
    }

    #[test]
    fn cohorts_follow_calendar_days() {
        let zone = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = zone.with_ymd_and_hms(2024, 5, 10, 0, 30, 0).unwrap();
        let now_utc = now.with_timezone(&Utc);

        // 40 minutes earlier is already the previous local day.
        assert_eq!(Cohort::of(&(now_utc - Duration::minutes(40)), &now), Cohort::Yesterday);
        assert_eq!(Cohort::of(&(now_utc - Duration::minutes(10)), &now), Cohort::Today);
        assert_eq!(Cohort::of(&(now_utc + Duration::hours(3)), &now), Cohort::Today);
        assert_eq!(Cohort::of(&(now_utc - Duration::days(2)), &now), Cohort::Week);
        assert_eq!(Cohort::of(&(now_utc - Duration::days(7)), &now), Cohort::Week);
        assert_eq!(Cohort::of(&(now_utc - Duration::days(8)), &now), Cohort::Earlier);
    }

    #[test]
    fn grouping_is_exhaustive_and_order_preserving() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let items: Vec<Notification> = (0..200)
            .map(|i| {
                let mut n = at(now, Duration::minutes(rng.gen_range(-120..60 * 24 * 20)));
                n.id = format!("n{i}");
                n
            })
            .collect();

        let cohorts = group_by_cohort(&items, &now);
        assert_eq!(cohorts.len(), items.len());

        for cohort in Cohort::ALL {
            let ids: Vec<&str> = cohorts.get(cohort).iter().map(|n| n.id.as_str()).collect();
            let expected: Vec<&str> = items
                .iter()
                .filter(|n| Cohort::of(&n.created_at, &now) == cohort)
                .map(|n| n.id.as_str())
                .collect();
            assert_eq!(ids, expected);
        }
        assert_eq!(group_by_cohort(&items, &now), cohorts);
    }

    #[test]
    fn time_ago_labels() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        assert_eq!(time_ago(&(now - Duration::seconds(42)), &now), "42s ago");
        assert_eq!(time_ago(&(now - Duration::minutes(5)), &now), "5m ago");
        assert_eq!(time_ago(&(now - Duration::hours(3)), &now), "3h ago");
        assert_eq!(time_ago(&(now - Duration::hours(30)), &now), "Yesterday");
        assert_eq!(time_ago(&(now - Duration::days(9)), &now), "2024-05-01");
        assert_eq!(time_ago(&(now + Duration::seconds(5)), &now), "0s ago");
    }

    #[test]
    fn badge_caps_at_ninety_nine() {
        assert_eq!(badge_label(0), None);
        assert_eq!(badge_label(7).as_deref(), Some("7"));
        assert_eq!(badge_label(99).as_deref(), Some("99"));
        assert_eq!(badge_label(100).as_deref(), Some("99+"));
    }

    #[test]
    fn icons_per_kind() {
        assert_eq!(icon(NotificationKind::Follow), "👤");
        assert_eq!(icon(NotificationKind::Other), "🔔");
    }

    #[test]
    fn inbox_tracks_unread() {
        let now = Utc::now();
        let mut read = at(now, Duration::minutes(1));
        read.id = "a".into();
        read.read = true;
        let mut unread = at(now, Duration::days(3));
        unread.id = "b".into();
        let mut inbox = Inbox::default();
        inbox.replace(vec![read, unread]);
        assert_eq!(inbox.unread(), 1);
        assert!(inbox.mark_read("b"));
        assert_eq!(inbox.unread(), 0);
        assert!(!inbox.mark_read("zzz"));
        inbox.set_unread(4);
        inbox.mark_all_read();
        assert_eq!(inbox.badge(), None);
    }

    #[test]
    fn policy_parses_snake_case() {
        let policy: MarkReadPolicy = serde_yaml::from_str("on_success").unwrap();
        assert_eq!(policy, MarkReadPolicy::OnSuccess);
        assert_eq!(MarkReadPolicy::default(), MarkReadPolicy::Always);
    }
}
