use crate::schema::ReportEntity;
use anyhow::{anyhow, Result};
use std::cmp::Ordering;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    LastUpdate,
    Start,
    End,
    Road,
    Condition,
    City,
    Archived,
}

/// The value a key extracts from a report. Variants of the same key always
/// match, so comparison never crosses types.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue<'a> {
    Time(Option<OffsetDateTime>),
    Text(Option<&'a str>),
    Flag(bool),
}

impl SortKey {
    pub const ALL: [SortKey; 7] = [
        SortKey::LastUpdate,
        SortKey::Start,
        SortKey::End,
        SortKey::Road,
        SortKey::Condition,
        SortKey::City,
        SortKey::Archived,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SortKey::LastUpdate => "lastUpdate",
            SortKey::Start => "start",
            SortKey::End => "end",
            SortKey::Road => "road",
            SortKey::Condition => "condition",
            SortKey::City => "city",
            SortKey::Archived => "archived",
        }
    }

    fn extract(self, report: &ReportEntity) -> SortValue<'_> {
        let attrs = &report.attributes;
        match self {
            SortKey::LastUpdate => SortValue::Time(Some(attrs.last_update.at)),
            SortKey::Start => SortValue::Time(attrs.start.as_ref().map(|stamp| stamp.at)),
            SortKey::End => SortValue::Time(attrs.end.as_ref().map(|stamp| stamp.at)),
            SortKey::Road => SortValue::Text(Some(attrs.road.as_str())),
            SortKey::Condition => SortValue::Text(Some(attrs.condition.as_str())),
            SortKey::City => SortValue::Text(attrs.city.as_deref()),
            SortKey::Archived => SortValue::Flag(report.archived),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub descending: bool,
}

impl SortSpec {
    pub fn ascending(key: SortKey) -> Self {
        Self {
            key,
            descending: false,
        }
    }
}

impl std::str::FromStr for SortSpec {
    type Err = anyhow::Error;

    /// `"start"` sorts ascending, `"-start"` descending.
    fn from_str(value: &str) -> Result<Self> {
        let (descending, name) = match value.strip_prefix('-') {
            Some(name) => (true, name),
            None => (false, value),
        };
        let key = SortKey::ALL
            .into_iter()
            .find(|key| key.name() == name)
            .ok_or_else(|| anyhow!("Unknown sort key: {value}"))?;
        Ok(Self { key, descending })
    }
}

impl std::fmt::Display for SortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.descending { "-" } else { "" };
        write!(f, "{sign}{}", self.key.name())
    }
}

pub fn default_order() -> Vec<SortSpec> {
    [
        SortKey::LastUpdate,
        SortKey::Start,
        SortKey::End,
        SortKey::Road,
        SortKey::Condition,
        SortKey::City,
    ]
    .into_iter()
    .map(SortSpec::ascending)
    .collect()
}

/// Multi-key comparison: the first key that tells the reports apart decides.
pub fn compare(a: &ReportEntity, b: &ReportEntity, key_order: &[SortSpec]) -> Ordering {
    for spec in key_order {
        let ordering = spec.key.extract(a).cmp(&spec.key.extract(b));
        let ordering = if spec.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Archive,
    Road,
    Desc,
    Start,
    End,
    Updated,
}

impl Column {
    /// The description column sorts by city while city/county is shown.
    pub fn sort_key(self, show_city: bool) -> SortKey {
        match self {
            Column::Archive => SortKey::Archived,
            Column::Road => SortKey::Road,
            Column::Desc if show_city => SortKey::City,
            Column::Desc => SortKey::Condition,
            Column::Start => SortKey::Start,
            Column::End => SortKey::End,
            Column::Updated => SortKey::LastUpdate,
        }
    }
}

/// Table ordering state for one session.
#[derive(Debug, Clone)]
pub struct TableSort {
    order: Vec<SortSpec>,
    last_clicked: Option<SortKey>,
    reversed: bool,
}

impl Default for TableSort {
    fn default() -> Self {
        Self::new(default_order())
    }
}

impl TableSort {
    pub fn new(order: Vec<SortSpec>) -> Self {
        Self {
            order,
            last_clicked: None,
            reversed: false,
        }
    }

    pub fn order(&self) -> &[SortSpec] {
        &self.order
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// Promotes the column's key to the front. A repeated click on the same
    /// column flips the final order instead and leaves the keys alone.
    pub fn click(&mut self, column: Column, show_city: bool) {
        let key = column.sort_key(show_city);
        if self.last_clicked == Some(key) {
            self.reversed = !self.reversed;
            return;
        }
        self.reversed = false;
        let spec = match self.order.iter().position(|spec| spec.key == key) {
            Some(idx) => self.order.remove(idx),
            None => SortSpec::ascending(key),
        };
        self.order.insert(0, spec);
        self.last_clicked = Some(key);
    }

    /// Sorts ascending by the key order, then flips so the newest come first;
    /// the reversal flag flips once more.
    pub fn apply(&self, reports: &mut [ReportEntity]) {
        reports.sort_by(|a, b| compare(a, b, &self.order));
        reports.reverse();
        if self.reversed {
            reports.reverse();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest;
    use crate::settings::ArchiveSet;
    use serde_json::json;

    fn reports() -> Vec<ReportEntity> {
        let records = vec![
            json!({"id": 1, "road": "I-40", "condition": "Road Closed", "latitude": 35.0, "longitude": -78.0,
                   "start": "2024-01-03T00:00", "lastUpdate": "2024-01-05T00:00", "city": "Raleigh"}),
            json!({"id": 2, "road": "US-70", "condition": "Ramp Closed", "latitude": 35.0, "longitude": -78.0,
                   "start": "2024-01-01T00:00", "lastUpdate": "2024-01-05T00:00", "city": "Durham"}),
            json!({"id": 3, "road": "NC-50", "condition": "Road Impassable", "latitude": 35.0, "longitude": -78.0,
                   "start": "2024-01-02T00:00", "lastUpdate": "2024-01-07T00:00"}),
        ];
        ingest(&records, &mut ArchiveSet::new()).reports
    }

    fn ids(reports: &[ReportEntity]) -> Vec<&str> {
        reports.iter().map(|report| report.id.as_str()).collect()
    }

    #[test]
    fn default_order_puts_most_recent_first() {
        let mut list = reports();
        TableSort::default().apply(&mut list);
        // 3 is newest; 1 and 2 tie on lastUpdate and break on start.
        assert_eq!(ids(&list), vec!["3", "1", "2"]);
    }

    #[test]
    fn descending_marker_flips_a_single_key() {
        let list = reports();
        let asc: Vec<SortSpec> = vec!["start".parse().unwrap()];
        let desc: Vec<SortSpec> = vec!["-start".parse().unwrap()];
        assert_eq!(compare(&list[0], &list[1], &asc), Ordering::Greater);
        assert_eq!(compare(&list[0], &list[1], &desc), Ordering::Less);
    }

    #[test]
    fn missing_values_sort_first() {
        let list = reports();
        let by_city: Vec<SortSpec> = vec!["city".parse().unwrap()];
        assert_eq!(compare(&list[2], &list[0], &by_city), Ordering::Less);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!("attributes.lastUpdate".parse::<SortSpec>().is_err());
        assert_eq!("-road".parse::<SortSpec>().unwrap().to_string(), "-road");
    }

    #[test]
    fn click_promotes_then_reclick_reverses() {
        let mut sort = TableSort::new(vec![
            SortSpec::ascending(SortKey::LastUpdate),
            SortSpec::ascending(SortKey::Start),
        ]);
        let mut list = reports();

        sort.click(Column::Start, false);
        assert_eq!(
            sort.order(),
            &[
                SortSpec::ascending(SortKey::Start),
                SortSpec::ascending(SortKey::LastUpdate)
            ]
        );
        sort.apply(&mut list);
        let promoted = ids(&list).into_iter().map(String::from).collect::<Vec<_>>();
        assert_eq!(promoted, vec!["1", "3", "2"]);

        sort.click(Column::Start, false);
        assert!(sort.is_reversed());
        assert_eq!(sort.order()[0].key, SortKey::Start);
        sort.apply(&mut list);
        let mut expected = promoted.clone();
        expected.reverse();
        assert_eq!(ids(&list), expected);
    }

    #[test]
    fn clicking_another_column_clears_reversal_and_inserts_missing_keys() {
        let mut sort = TableSort::default();
        sort.click(Column::Road, false);
        sort.click(Column::Road, false);
        assert!(sort.is_reversed());
        sort.click(Column::Archive, false);
        assert!(!sort.is_reversed());
        assert_eq!(sort.order()[0].key, SortKey::Archived);
        assert_eq!(sort.order()[1].key, SortKey::Road);
        assert_eq!(sort.order().len(), 7);
    }

    #[test]
    fn desc_column_follows_city_toggle() {
        assert_eq!(Column::Desc.sort_key(true), SortKey::City);
        assert_eq!(Column::Desc.sort_key(false), SortKey::Condition);
    }
}
