use cronvisor::sink::{JobEvent, JobSink};

/// A sink that remembers everything it was handed.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    /// Raw calls in order; `None` marks the end of a block.
    pub lines: Vec<(String, Option<String>)>,
    pub events: Vec<(String, JobEvent)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed blocks of `job`, in delivery order.
    pub fn blocks(&self, job: &str) -> Vec<Vec<String>> {
        let mut blocks = Vec::new();
        let mut current = Vec::new();
        for (name, line) in &self.lines {
            if name != job {
                continue;
            }
            match line {
                Some(line) => current.push(line.clone()),
                None => blocks.push(std::mem::take(&mut current)),
            }
        }
        blocks
    }

    /// Every record of `job`, ignoring block boundaries.
    pub fn records(&self, job: &str) -> Vec<String> {
        self.blocks(job).into_iter().flatten().collect()
    }

    pub fn events_for(&self, job: &str) -> Vec<JobEvent> {
        self.events
            .iter()
            .filter(|(name, _)| name == job)
            .map(|(_, e)| *e)
            .collect()
    }

    pub fn started(&self, job: &str) -> usize {
        self.events_for(job)
            .iter()
            .filter(|e| matches!(e, JobEvent::Started { .. }))
            .count()
    }

    pub fn died(&self, job: &str) -> usize {
        self.events_for(job)
            .iter()
            .filter(|e| matches!(e, JobEvent::Died { .. }))
            .count()
    }
}

impl JobSink for RecordingSink {
    fn on_output_line(&mut self, job: &str, line: Option<&str>) {
        self.lines.push((job.to_string(), line.map(str::to_string)));
    }

    fn on_job_event(&mut self, job: &str, event: JobEvent) {
        self.events.push((job.to_string(), event));
    }
}
