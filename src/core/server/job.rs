use crate::core::server::JobControl;

/// Job states as numbered by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    NotLaunched,
    InQueue,
    Running,
    /// Also reported as "terminated"
    Success,
    Failed,
    Indeterminate,
    Wait,
    Previewed,
    Killed,
}

impl JobStatus {
    pub const TERMINATED: JobStatus = JobStatus::Success;

    pub fn code(self) -> i64 {
        i64::from(self)
    }
}

impl From<JobStatus> for i64 {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::NotLaunched => 0,
            JobStatus::InQueue => 1,
            JobStatus::Running => 2,
            JobStatus::Success => 3,
            JobStatus::Failed => 4,
            JobStatus::Indeterminate => 5,
            JobStatus::Wait => 6,
            JobStatus::Previewed => 7,
            JobStatus::Killed => 8,
        }
    }
}

impl TryFrom<i64> for JobStatus {
    type Error = anyhow::Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(JobStatus::NotLaunched),
            1 => Ok(JobStatus::InQueue),
            2 => Ok(JobStatus::Running),
            3 => Ok(JobStatus::Success),
            4 => Ok(JobStatus::Failed),
            5 => Ok(JobStatus::Indeterminate),
            6 => Ok(JobStatus::Wait),
            7 => Ok(JobStatus::Previewed),
            8 => Ok(JobStatus::Killed),
            _ => Err(anyhow::anyhow!("Invalid JobStatus value: {}", value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: JobStatus,
    /// Percentage, `None` leaves the server-side value untouched
    pub progress: Option<u8>,
    pub comment: String,
}

impl JobUpdate {
    pub fn new(status: JobStatus, progress: u8, comment: impl Into<String>) -> Self {
        Self {
            status,
            progress: Some(progress.min(100)),
            comment: comment.into(),
        }
    }
}

/// Iterator adapter reporting progress while work items are consumed.
///
/// Progress runs linearly from 0 to 100 over the items; an update is sent
/// for the first item and then every `ceil(period * total)` items.
pub struct Monitor<'a, I> {
    job: &'a dyn JobControl,
    inner: I,
    prefix: String,
    total: usize,
    step: usize,
    index: usize,
}

pub fn monitor<'a, I>(
    job: &'a dyn JobControl,
    items: I,
    prefix: &str,
    period: f64,
) -> Monitor<'a, I::IntoIter>
where
    I: IntoIterator,
    I::IntoIter: ExactSizeIterator,
{
    let inner = items.into_iter();
    let total = inner.len();
    let step = if period > 0.0 {
        ((period * total as f64).ceil() as usize).max(1)
    } else {
        1
    };
    Monitor {
        job,
        inner,
        prefix: prefix.to_string(),
        total,
        step,
        index: 0,
    }
}

impl<I: Iterator> Iterator for Monitor<'_, I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        if self.index % self.step == 0 {
            let progress = (self.index * 100 / self.total.max(1)) as u8;
            let update = JobUpdate::new(
                JobStatus::Running,
                progress,
                format!("{} ({}/{}).", self.prefix, self.index + 1, self.total),
            );
            if let Err(e) = self.job.update_job(&update) {
                tracing::warn!(error = %e, "Failed to report job progress");
            }
        }
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Run `body` as the job's main routine. An error marks the job as failed
/// with the error chain as status comment, then is handed back to the caller.
pub fn run_job<T, E>(job: &dyn JobControl, body: impl FnOnce() -> Result<T, E>) -> Result<T, E>
where
    E: std::error::Error,
{
    body().inspect_err(|e| {
        let mut comment = e.to_string();
        let mut source = e.source();
        while let Some(cause) = source {
            comment.push_str(": ");
            comment.push_str(&cause.to_string());
            source = cause.source();
        }
        let update = JobUpdate {
            status: JobStatus::Failed,
            progress: None,
            comment,
        };
        if let Err(report_err) = job.update_job(&update) {
            tracing::warn!(error = %report_err, "Failed to mark job as failed");
        }
    })
}
