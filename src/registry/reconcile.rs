// src/registry/reconcile.rs

//! Mark-sweep reconciliation of the registry against a declared job list.

use tracing::{info, warn};

use crate::job::{Job, JobContext, JobDescriptor, JobError};

use super::JobRegistry;

/// What a reconciliation pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Jobs created (and initialized) by this pass.
    pub added: Vec<String>,
    /// Pre-existing jobs that were kept and updated in place.
    pub kept: Vec<String>,
    /// Jobs that disappeared from the list and were killed.
    pub removed: Vec<String>,
    /// Descriptors that could not be applied.
    pub rejected: Vec<(String, JobError)>,
}

impl JobRegistry {
    /// Bring the registry in line with `descriptors`.
    ///
    /// 1. Clear every mark.
    /// 2. For each descriptor, update the existing job of that name or
    ///    create a new one, and mark it.
    /// 3. Remove (and kill) every unmarked job.
    /// 4. SIGHUP kept jobs that accept it; jobs created in this pass are
    ///    only initialized.
    ///
    /// Jobs that survive keep their process, state and output counters.
    pub fn reconcile(
        &mut self,
        descriptors: &[JobDescriptor],
        cx: &mut JobContext<'_>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        self.clear_all_marks();

        for desc in descriptors {
            if let Some(job) = self.find_mut(&desc.name) {
                if job.is_marked() {
                    warn!(job = %desc.name, "job listed twice; ignoring the later entry");
                    continue;
                }
                // Marked even when the update fails, so a bad edit never
                // takes down a running job.
                job.mark();
                match job.apply_descriptor(desc, cx) {
                    Ok(()) => report.kept.push(desc.name.clone()),
                    Err(e) => {
                        warn!(job = %desc.name, error = %e, "keeping previous settings");
                        report.rejected.push((desc.name.clone(), e));
                    }
                }
                continue;
            }

            match Job::from_descriptor(desc, self.limits()) {
                Ok(mut job) => {
                    job.mark();
                    if self.add(job).is_ok() {
                        report.added.push(desc.name.clone());
                    }
                }
                Err(e) => {
                    warn!(job = %desc.name, error = %e, "rejecting job");
                    report.rejected.push((desc.name.clone(), e));
                }
            }
        }

        report.removed = self.delete_unmarked(cx);

        for name in &report.kept {
            if let Some(job) = self.find_mut(name) {
                if let Err(e) = job.reconfig(cx) {
                    warn!(job = %name, error = %e, "reconfig failed");
                }
            }
        }

        for name in &report.added {
            if let Some(job) = self.find_mut(name) {
                if let Err(e) = job.initialize(cx) {
                    warn!(job = %name, error = %e, "initialize failed");
                }
            }
        }

        info!(
            added = report.added.len(),
            kept = report.kept.len(),
            removed = report.removed.len(),
            rejected = report.rejected.len(),
            "job list reconciled"
        );
        report
    }
}
