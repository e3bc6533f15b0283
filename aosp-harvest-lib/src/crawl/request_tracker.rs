use super::progress::Progress;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use owo_colors::OwoColorize;
use std::sync::Arc;

const TOPIC_COUNT: usize = 3;

/// Topics that can be tracked for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrackedTopic {
    /// Search hits received against the service's running estimate.
    Results,
    /// Repository ref checks.
    Repos,
    /// Individual document fetches.
    Documents,
}

impl TrackedTopic {
    /// Get the display name for this topic.
    const fn name(self) -> &'static str {
        match self {
            Self::Results => "results",
            Self::Repos => "repos",
            Self::Documents => "documents",
        }
    }

    /// Get all tracked topics in a consistent order.
    const fn all() -> [Self; TOPIC_COUNT] {
        [Self::Results, Self::Repos, Self::Documents]
    }

    /// Convert to array index.
    const fn index(self) -> usize {
        self as usize
    }
}

/// Visual status of a tracked topic, controlling its display color in the
/// progress bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TopicStatus {
    /// Normal active state (default color).
    Active = 0,
    /// Backing off after the remote pushed back (blinks yellow).
    Blocked = 1,
    /// All requests completed (green).
    Done = 2,
}

/// Counter for a specific tracked topic.
#[derive(Debug, Default)]
struct RequestCounter {
    issued: AtomicU64,
    completed: AtomicU64,
    status: AtomicU8,
}

/// Tracks outstanding requests and feeds the progress indicator.
///
/// Clones share their counters, so one tracker can be handed to concurrent tasks.
#[derive(Debug, Clone)]
pub struct RequestTracker {
    counters: Arc<[RequestCounter; TOPIC_COUNT]>,
}

impl RequestTracker {
    /// Create a tracker whose counts drive `progress` until it is given another callback.
    #[must_use]
    pub fn new(progress: &Arc<dyn Progress>) -> Self {
        let counters: Arc<[RequestCounter; TOPIC_COUNT]> = Arc::default();

        let counters_clone = Arc::clone(&counters);
        let use_colors = progress.use_colors();
        progress.set_determinate(Box::new(move || Self::progress_reporter_callback(&counters_clone, use_colors)));

        Self { counters }
    }

    /// Mark that multiple new requests have been issued for the given topic.
    pub fn add_requests(&self, topic: TrackedTopic, count: u64) {
        let counter = &self.counters[topic.index()];
        let _ = counter.issued.fetch_add(count, Ordering::Relaxed);
    }

    /// Replace the expected total for a topic. The remote's estimate may move in either direction.
    pub fn set_expected(&self, topic: TrackedTopic, total: u64) {
        self.counters[topic.index()].issued.store(total, Ordering::Relaxed);
    }

    /// Mark that a request has completed for the given topic.
    pub fn complete_request(&self, topic: TrackedTopic) {
        self.complete_requests(topic, 1);
    }

    /// Mark several completions at once.
    ///
    /// Automatically sets the topic status to [`TopicStatus::Done`] when all
    /// issued requests have completed.
    pub fn complete_requests(&self, topic: TrackedTopic, count: u64) {
        let counter = &self.counters[topic.index()];
        let completed = counter.completed.fetch_add(count, Ordering::Relaxed) + count;
        let issued = counter.issued.load(Ordering::Relaxed);
        if completed >= issued && issued > 0 {
            counter.status.store(TopicStatus::Done as u8, Ordering::Relaxed);
        }
    }

    /// Set the visual status of a topic, controlling its color in the progress bar.
    pub fn set_topic_status(&self, topic: TrackedTopic, status: TopicStatus) {
        self.counters[topic.index()].status.store(status as u8, Ordering::Relaxed);
    }

    /// Issued and completed counts for a topic.
    #[must_use]
    pub fn counts(&self, topic: TrackedTopic) -> (u64, u64) {
        let counter = &self.counters[topic.index()];
        (counter.issued.load(Ordering::Relaxed), counter.completed.load(Ordering::Relaxed))
    }

    /// Compute current progress state from counters.
    ///
    /// Returns (`total_length`, `current_position`, `message_string`).
    fn progress_reporter_callback(counters: &[RequestCounter; TOPIC_COUNT], use_colors: bool) -> (u64, u64, String) {
        // Toggle every 500ms for the blink effect on blocked topics
        let blink_on = use_colors && {
            let ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            (ms / 500).is_multiple_of(2)
        };

        let mut total_issued = 0u64;
        let mut total_completed = 0u64;
        let mut parts = Vec::with_capacity(TOPIC_COUNT);

        for topic in TrackedTopic::all() {
            let counter = &counters[topic.index()];
            let issued = counter.issued.load(Ordering::Relaxed);
            // estimates can drop below what already arrived
            let completed = counter.completed.load(Ordering::Relaxed).min(issued);

            if issued > 0 {
                total_issued += issued;
                total_completed += completed;

                let text = format!("{completed}/{issued} {}", topic.name());
                let status = counter.status.load(Ordering::Relaxed);

                let styled = if use_colors && status == TopicStatus::Done as u8 {
                    format!("{}", text.green())
                } else if status == TopicStatus::Blocked as u8 && blink_on {
                    format!("{}", text.yellow())
                } else {
                    text
                };

                parts.push(styled);
            }
        }

        let message = if parts.is_empty() {
            "No requests".to_string()
        } else {
            parts.join(", ")
        };

        (total_issued, total_completed, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::progress::NoProgress;

    fn tracker() -> RequestTracker {
        let progress: Arc<dyn Progress> = Arc::new(NoProgress);
        RequestTracker::new(&progress)
    }

    #[test]
    fn no_requests_message() {
        let counters: [RequestCounter; TOPIC_COUNT] = Default::default();
        let (total, current, message) = RequestTracker::progress_reporter_callback(&counters, false);
        assert_eq!((total, current), (0, 0));
        assert_eq!(message, "No requests");
    }

    #[test]
    fn completion_marks_topic_done() {
        let tracker = tracker();
        tracker.add_requests(TrackedTopic::Documents, 2);
        tracker.complete_request(TrackedTopic::Documents);
        assert_eq!(tracker.counts(TrackedTopic::Documents), (2, 1));
        tracker.complete_request(TrackedTopic::Documents);

        let status = tracker.counters[TrackedTopic::Documents.index()].status.load(Ordering::Relaxed);
        assert_eq!(status, TopicStatus::Done as u8);
    }

    #[test]
    fn revised_estimate_is_tolerated() {
        let tracker = tracker();
        tracker.set_expected(TrackedTopic::Results, 250);
        tracker.complete_requests(TrackedTopic::Results, 100);
        tracker.set_expected(TrackedTopic::Results, 90);

        let (total, current, message) = RequestTracker::progress_reporter_callback(&tracker.counters, false);
        assert_eq!((total, current), (90, 90));
        assert_eq!(message, "90/90 results");
    }

    #[test]
    fn message_lists_active_topics_in_order() {
        let tracker = tracker();
        tracker.add_requests(TrackedTopic::Documents, 3);
        tracker.add_requests(TrackedTopic::Repos, 1);

        let (_, _, message) = RequestTracker::progress_reporter_callback(&tracker.counters, false);
        assert_eq!(message, "0/1 repos, 0/3 documents");
    }
}
