//! Domain entities
//!
//! A [`Record`] is the collected fare for one departure date. Records are
//! keyed uniquely by date: [`RecordSet`] keeps the most recently merged
//! record per date and turns into date-sorted [`AggregateRows`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::value_objects::{DateWindow, FieldValue};

/// Field name → value map produced by extraction
pub type ExtractedFields = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub date: NaiveDate,
    pub window: DateWindow,
    pub fields: ExtractedFields,
}

impl Record {
    #[must_use]
    pub fn new(window: DateWindow, fields: ExtractedFields) -> Self {
        Self {
            date: window.depart,
            window,
            fields,
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// Date-keyed record collection with last-write-wins merge semantics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    records: BTreeMap<NaiveDate, Record>,
}

impl RecordSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record, returning the one it replaced for the same date.
    pub fn insert(&mut self, record: Record) -> Option<Record> {
        self.records.insert(record.date, record)
    }

    /// Merges `later` into `self`; records from `later` win on date collisions.
    pub fn merge(&mut self, later: Self) {
        self.records.extend(later.records);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn contains(&self, date: &NaiveDate) -> bool {
        self.records.contains_key(date)
    }

    #[must_use]
    pub fn get(&self, date: &NaiveDate) -> Option<&Record> {
        self.records.get(date)
    }

    #[must_use]
    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.records.keys().copied().collect()
    }

    /// Date-sorted, duplicate-free rows for the aggregate sink
    #[must_use]
    pub fn into_aggregate(self) -> AggregateRows {
        AggregateRows(
            self.records
                .into_values()
                .map(|record| AggregateRow {
                    date: record.date,
                    fields: record.fields,
                })
                .collect(),
        )
    }
}

impl FromIterator<Record> for RecordSet {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut set = Self::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

/// One output row: the date followed by the extracted fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub fields: ExtractedFields,
}

/// Rows ascending by date, at most one per date
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateRows(Vec<AggregateRow>);

impl AggregateRows {
    #[must_use]
    pub fn rows(&self) -> &[AggregateRow] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AggregateRow> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(day: u32, price: f64) -> Record {
        let depart = NaiveDate::from_ymd_opt(2025, 5, day).unwrap();
        let mut fields = ExtractedFields::new();
        fields.insert("price".into(), FieldValue::Number(price));
        Record::new(DateWindow::starting(depart, 3).unwrap(), fields)
    }

    #[test]
    fn test_later_record_replaces_earlier() {
        let mut set = RecordSet::new();
        assert!(set.insert(record(2, 300.0)).is_none());
        let replaced = set.insert(record(2, 250.0));
        assert_eq!(replaced.unwrap().field("price"), Some(&FieldValue::Number(300.0)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_merge_prefers_later_set() {
        let mut primary: RecordSet = [record(1, 100.0), record(2, 200.0)].into_iter().collect();
        let retry: RecordSet = [record(2, 180.0), record(3, 90.0)].into_iter().collect();
        primary.merge(retry);

        assert_eq!(primary.len(), 3);
        let day2 = NaiveDate::from_ymd_opt(2025, 5, 2).unwrap();
        assert_eq!(primary.get(&day2).unwrap().field("price"), Some(&FieldValue::Number(180.0)));
    }

    #[test]
    fn test_aggregate_rows_sorted_and_flattened() {
        let set: RecordSet = [record(9, 1.0), record(3, 2.0), record(5, 3.0)].into_iter().collect();
        let rows = set.into_aggregate();
        let dates: Vec<_> = rows.iter().map(|row| row.date.to_string()).collect();
        assert_eq!(dates, vec!["2025-05-03", "2025-05-05", "2025-05-09"]);

        let json = serde_json::to_value(&rows).unwrap();
        assert_eq!(json[0]["date"], "2025-05-03");
        assert_eq!(json[0]["price"], 2.0);
    }
}
