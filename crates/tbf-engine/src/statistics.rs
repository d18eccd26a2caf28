//! Append-only run statistics.
//!
//! Each side of a run (generator, validator) owns one [`Statistics`] bag and
//! writes only its own section. The bags are merged into the final report by
//! concatenation once both sides have terminated; nothing reads them back.

use std::fmt;
use std::time::{Duration, Instant};

/// Accumulating wall-clock timer.
#[derive(Debug, Clone, Default)]
pub struct Stopwatch {
    intervals: Vec<Duration>,
    current_start: Option<Instant>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        debug_assert!(self.current_start.is_none(), "stopwatch already running");
        self.current_start = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.intervals.push(start.elapsed());
        }
    }

    /// Run `f` while the stopwatch is running.
    pub fn time<T>(&mut self, f: impl FnOnce() -> T) -> T {
        self.start();
        let out = f();
        self.stop();
        out
    }

    pub fn is_running(&self) -> bool {
        self.current_start.is_some()
    }

    /// Elapsed time of the currently running interval.
    pub fn current(&self) -> Duration {
        self.current_start
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }

    pub fn sum(&self) -> Duration {
        self.intervals.iter().sum()
    }

    pub fn avg(&self) -> Duration {
        if self.intervals.is_empty() {
            return Duration::ZERO;
        }
        self.sum() / self.intervals.len() as u32
    }

    pub fn min(&self) -> Duration {
        self.intervals.iter().min().copied().unwrap_or_default()
    }

    pub fn max(&self) -> Duration {
        self.intervals.iter().max().copied().unwrap_or_default()
    }

    pub fn intervals(&self) -> usize {
        self.intervals.len()
    }
}

fn secs(d: Duration) -> String {
    format!("{:.3}", d.as_secs_f64())
}

impl fmt::Display for Stopwatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (s)", secs(self.sum()))?;
        if self.intervals.len() > 1 {
            write!(
                f,
                " (Avg.: {} s, Min.: {} s, Max.: {} s)",
                secs(self.avg()),
                secs(self.min()),
                secs(self.max())
            )?;
        }
        Ok(())
    }
}

/// Monotonic counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter(u64);

impl Counter {
    pub fn inc(&mut self) {
        self.add(1);
    }

    pub fn add(&mut self, amount: u64) {
        self.0 = self.0.saturating_add(amount);
    }

    pub fn count(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Titled, ordered bag of `name: value` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statistics {
    title: String,
    entries: Vec<(String, String)>,
}

impl Statistics {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            entries: Vec::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Record a value. Property names are unique within one bag; recording
    /// the same name again replaces the earlier value in place.
    pub fn add_value(&mut self, property: impl Into<String>, value: impl fmt::Display) {
        let property = property.into();
        let value = value.to_string();
        match self.entries.iter_mut().find(|(p, _)| *p == property) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((property, value)),
        }
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "---- {} ----", self.title)?;
        for (property, value) in &self.entries {
            write!(f, "\n{property}: {value}")?;
        }
        Ok(())
    }
}

/// Concatenate the sections that are present, separated by a blank line.
pub fn merge_statistics<'a>(sections: impl IntoIterator<Item = Option<&'a Statistics>>) -> String {
    sections
        .into_iter()
        .flatten()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_entries_under_title() {
        let mut stats = Statistics::new("Test Validator execution");
        let mut counter = Counter::default();
        counter.add(3);
        stats.add_value("Number of looked-at test cases", counter);
        stats.add_value("Size of successful test vector", "None");
        assert_eq!(
            stats.to_string(),
            "---- Test Validator execution ----\n\
             Number of looked-at test cases: 3\n\
             Size of successful test vector: None"
        );
    }

    #[test]
    fn re_adding_a_property_replaces_it() {
        let mut stats = Statistics::new("x");
        stats.add_value("a", 1);
        stats.add_value("a", 2);
        assert_eq!(stats.entries(), &[("a".to_string(), "2".to_string())]);
    }

    #[test]
    fn merge_skips_missing_sections() {
        let a = Statistics::new("Generator");
        let b = Statistics::new("Validator");
        assert_eq!(
            merge_statistics([Some(&a), None, Some(&b)]),
            "---- Generator ----\n\n---- Validator ----"
        );
        assert_eq!(merge_statistics([None, None]), "");
    }

    #[test]
    fn stopwatch_accumulates_intervals() {
        let mut watch = Stopwatch::new();
        watch.time(|| std::thread::sleep(Duration::from_millis(2)));
        watch.time(|| ());
        assert_eq!(watch.intervals(), 2);
        assert!(watch.sum() >= Duration::from_millis(2));
        assert!(watch.max() >= watch.min());
        assert!(watch.to_string().contains("Avg.:"));
    }

    #[test]
    fn stopped_stopwatch_without_start_is_noop() {
        let mut watch = Stopwatch::new();
        watch.stop();
        assert_eq!(watch.intervals(), 0);
        assert_eq!(watch.to_string(), "0.000 (s)");
    }
}
