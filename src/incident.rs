//! Incident report (E-FIR) generation and the append-only incident ledger.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Alert, IncidentReport};

/// Append-only store of incident reports, at most one per source alert.
#[derive(Debug, Clone, Default)]
pub struct IncidentLedger {
    reports: Vec<IncidentReport>,
    by_alert: HashMap<Uuid, usize>,
}

impl IncidentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the ledger from persisted reports.
    pub fn from_reports(reports: Vec<IncidentReport>) -> Result<Self> {
        let mut ledger = Self::new();
        for report in reports {
            ledger.append(report)?;
        }
        Ok(ledger)
    }

    /// Snapshot `alert` into a new report and append it.
    ///
    /// Fails with [`Error::Precondition`] if the alert is already marked as
    /// escalated or a report for it already exists.
    pub fn generate(&mut self, alert: &Alert, now: DateTime<Utc>) -> Result<IncidentReport> {
        if alert.incident_generated {
            return Err(Error::Precondition(format!(
                "alert {} already has an incident report",
                alert.id
            )));
        }

        let report = IncidentReport {
            id: Uuid::new_v4(),
            reference: reference_for(alert, now),
            source_alert_id: alert.id,
            tourist_id: alert.tourist_id.clone(),
            generated_at: now,
            alert: alert.clone(),
        };

        self.append(report.clone())?;
        Ok(report)
    }

    fn append(&mut self, report: IncidentReport) -> Result<()> {
        if self.by_alert.contains_key(&report.source_alert_id) {
            return Err(Error::Precondition(format!(
                "alert {} already has an incident report",
                report.source_alert_id
            )));
        }
        self.by_alert
            .insert(report.source_alert_id, self.reports.len());
        self.reports.push(report);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<&IncidentReport> {
        self.reports.iter().find(|report| report.id == id)
    }

    pub fn report_for_alert(&self, alert_id: Uuid) -> Option<&IncidentReport> {
        self.by_alert.get(&alert_id).map(|&index| &self.reports[index])
    }

    /// All reports, oldest first.
    pub fn reports(&self) -> &[IncidentReport] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Drop reports appended after the ledger had `len` entries.
    pub fn truncate(&mut self, len: usize) {
        for report in self.reports.drain(len.min(self.reports.len())..) {
            self.by_alert.remove(&report.source_alert_id);
        }
    }
}

/// `EFIR-<YYYYMMDD>-<first 8 hex digits of the alert id>`.
fn reference_for(alert: &Alert, now: DateTime<Utc>) -> String {
    let alert_id = alert.id.simple().to_string();
    format!(
        "EFIR-{}-{}",
        now.format("%Y%m%d"),
        alert_id[..8].to_uppercase()
    )
}
