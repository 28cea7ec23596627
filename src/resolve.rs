use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::str::FromStr;

use crate::core::StoredReport;
use crate::error::StoreError;
use crate::store::ReportStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending machine id.
    #[default]
    MachineId,
    /// Most recent report first.
    NewestFirst,
    Unordered,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "machine" | "machine_id" | "id" => Ok(SortOrder::MachineId),
            "newest" | "newest_first" | "recent" => Ok(SortOrder::NewestFirst),
            other => Err(format!(
                "並び順が不正です: {other}（machine|newest を指定してください）"
            )),
        }
    }
}

/// Current record per machine: at most one entry per `machine_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSet {
    current: HashMap<String, StoredReport>,
}

impl ResolvedSet {
    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn get(&self, machine_id: &str) -> Option<&StoredReport> {
        self.current.get(machine_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoredReport> {
        self.current.values()
    }

    pub fn into_records(self, order: SortOrder) -> Vec<StoredReport> {
        let mut records: Vec<StoredReport> = self.current.into_values().collect();
        sort_records(&mut records, order);
        records
    }

    fn offer(&mut self, candidate: StoredReport) {
        match self.current.entry(candidate.report.machine_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
            Entry::Occupied(mut slot) => {
                if candidate.recency_key() > slot.get().recency_key() {
                    slot.insert(candidate);
                }
            }
        }
    }
}

pub fn sort_records(records: &mut [StoredReport], order: SortOrder) {
    match order {
        SortOrder::MachineId => records.sort_by(|a, b| {
            a.report
                .machine_id
                .cmp(&b.report.machine_id)
                .then_with(|| b.recency_key().cmp(&a.recency_key()))
        }),
        SortOrder::NewestFirst => records.sort_by(|a, b| {
            b.recency_key()
                .cmp(&a.recency_key())
                .then_with(|| a.report.machine_id.cmp(&b.report.machine_id))
        }),
        SortOrder::Unordered => {}
    }
}

/// Reduces reports to the current record per machine in one pass.
///
/// The winner for a machine is the greatest `(timestamp, seq)`, so equal
/// timestamps go to whichever report was appended last regardless of the
/// order the reports arrive in.
pub fn resolve_reports<I>(reports: I) -> ResolvedSet
where
    I: IntoIterator<Item = StoredReport>,
{
    let mut set = ResolvedSet::default();
    for report in reports {
        set.offer(report);
    }
    set
}

/// Resolves against a single snapshot of `store`.
pub fn resolve(store: &dyn ReportStore) -> Result<ResolvedSet, StoreError> {
    let snapshot = store.snapshot()?;
    Ok(resolve_reports(snapshot))
}
