use skiprent_order::{InactivitySweep, SatisfactionSurveyJob};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

/// Periodic notification jobs. Both are idempotent so a tick may overlap a
/// restart without double sends.
pub struct JobRunner {
    survey: SatisfactionSurveyJob,
    sweep: InactivitySweep,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub surveys: usize,
    pub reminders: usize,
}

impl JobRunner {
    pub fn new(survey: SatisfactionSurveyJob, sweep: InactivitySweep) -> Self {
        Self { survey, sweep }
    }

    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        match self.survey.run().await {
            Ok(sent) => report.surveys = sent,
            Err(e) => error!("Satisfaction survey job failed: {}", e),
        }
        match self.sweep.run().await {
            Ok(sent) => report.reminders = sent,
            Err(e) => error!("Inactivity sweep failed: {}", e),
        }
        report
    }

    pub async fn run(self, every: Duration) {
        info!("Job worker started, ticking every {:?}", every);
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.tick().await;
            if report != TickReport::default() {
                info!(surveys = report.surveys, reminders = report.reminders, "Job tick finished");
            }
        }
    }
}
