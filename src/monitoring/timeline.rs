//! Execution Timeline
//!
//! Tracks job start/end times for the Gantt chart printed after a run.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::workflow::JobId;

/// Width of the chart bars in characters.
const CHART_WIDTH: f64 = 50.0;

/// Width of the label column.
const LABEL_WIDTH: usize = 24;

/// Type of timeline event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    /// Job started executing
    Started,
    /// Job completed successfully
    Completed,
    /// Job failed
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub job: JobId,
    /// Job label, e.g. `bwa[sample=s1]`
    pub label: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Tracks the execution timeline of a run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a job.
    pub fn add_event(&mut self, job: JobId, label: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            job,
            label: label.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each job that finished is shown as a bar indicating when it ran
    /// relative to the total execution time; failed jobs use `!`.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }
        let scale = CHART_WIDTH / total_time as f64;

        for span in self.spans() {
            let start_pos = (span.start as f64 * scale) as usize;
            let width = ((span.end - span.start) as f64 * scale).max(1.0) as usize;
            let fill = if span.failed { "!" } else { "#" };

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&fill.repeat(width));

            output.push_str(&format!(
                "{} |{:width$}| ({} ms)\n",
                truncate(&span.label, LABEL_WIDTH),
                bar,
                span.end - span.start,
                width = CHART_WIDTH as usize + 1
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns job durations in milliseconds.
    pub fn get_durations(&self) -> BTreeMap<JobId, u128> {
        self.spans()
            .into_iter()
            .map(|span| (span.job, span.end - span.start))
            .collect()
    }

    /// Finished jobs as (start, end) offsets, ordered by start time.
    fn spans(&self) -> Vec<Span> {
        let mut starts: BTreeMap<JobId, u128> = BTreeMap::new();
        let mut spans = Vec::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();
            match event.event_type {
                EventType::Started => {
                    starts.insert(event.job, elapsed);
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(&start) = starts.get(&event.job) {
                        spans.push(Span {
                            job: event.job,
                            label: event.label.clone(),
                            start,
                            end: elapsed.max(start),
                            failed: event.event_type == EventType::Failed,
                        });
                    }
                }
            }
        }

        spans.sort_by_key(|span| (span.start, span.job));
        spans
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

struct Span {
    job: JobId,
    label: String,
    start: u128,
    end: u128,
    failed: bool,
}

/// Pads or truncates a label to a fixed width.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.events.is_empty());
    }

    #[test]
    fn test_get_durations() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event(0, "bwa[sample=s1]", EventType::Started);
        thread::sleep(Duration::from_millis(50));
        timeline.add_event(0, "bwa[sample=s1]", EventType::Completed);

        let durations = timeline.get_durations();
        assert!(durations[&0] >= 50);
    }

    #[test]
    fn test_gantt_chart_generation() {
        let mut timeline = ExecutionTimeline::new();

        timeline.add_event(0, "fastqc[file=s1]", EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event(0, "fastqc[file=s1]", EventType::Completed);

        timeline.add_event(1, "bwa[sample=s1]", EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event(1, "bwa[sample=s1]", EventType::Failed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("fastqc[file=s1]"));
        assert!(chart.contains("bwa[sample=s1]"));
        assert!(chart.contains('!'));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_unfinished_jobs_have_no_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event(3, "a", EventType::Started);

        assert!(timeline.get_durations().is_empty());
        assert_eq!(timeline.get_events().len(), 1);
    }

    #[test]
    fn test_gantt_chart_empty() {
        let timeline = ExecutionTimeline::default();
        assert!(timeline.gantt_chart().contains("Timeline"));
    }

    #[test]
    fn test_truncate_long_label() {
        let label = truncate("variant_calling[sample=a_very_long_sample_name]", 24);
        assert_eq!(label.chars().count(), 24);
        assert!(label.ends_with("..."));
        assert_eq!(truncate("a", 3), "a  ");
    }
}
