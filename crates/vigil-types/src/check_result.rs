//! The immutable result of running a single check plugin.

use std::collections::BTreeMap;

use crate::service::State;
use crate::time::Timestamp;

/// Parsed `key=value` performance data pairs appended after a `|` on a
/// plugin's output line.
///
/// Kept as an ordered map (insertion order, via `Vec`) rather than a
/// `HashMap`: plugin output routinely repeats label names across lines,
/// and tests assert on first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PerformanceData(Vec<(String, String)>);

impl PerformanceData {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn push(&mut self, pair: &str) {
        // `label=value;warn;crit;min;max` — we only need the label and the
        // raw value; downstream notification/graphing consumers are out of
        // scope for this core.
        if let Some((key, value)) = pair.split_once('=') {
            self.0.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
}

/// Splits plugin stdout into (text, performance data), one `|` split per
/// line, right-hand sides concatenated in line order.
///
/// This mirrors §3's "Output is split at the first `|` per line; the
/// right-hand side is appended to `performance_data`."
fn split_output(raw: &str) -> (String, PerformanceData) {
    let mut text_lines = Vec::new();
    let mut perf = PerformanceData::default();

    for line in raw.lines() {
        match line.split_once('|') {
            Some((text, perfdata)) => {
                text_lines.push(text.trim_end().to_string());
                for pair in perfdata.split_whitespace() {
                    perf.push(pair);
                }
            }
            None => text_lines.push(line.to_string()),
        }
    }

    (text_lines.join("\n"), perf)
}

/// Maps a plugin's process exit status to a service state.
///
/// 0 → OK, 1 → Warning, 2 → Critical, anything else (including signal
/// termination, represented by the runner as 128) → Unknown.
pub fn state_from_exit_status(exit_status: u32) -> State {
    match exit_status {
        0 => State::Ok,
        1 => State::Warning,
        2 => State::Critical,
        _ => State::Unknown,
    }
}

/// The immutable outcome of one plugin execution.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CheckResult {
    pub schedule_start: Timestamp,
    pub schedule_end: Timestamp,
    pub execution_start: Timestamp,
    pub execution_end: Timestamp,
    pub exit_status: u32,
    pub output: String,
    pub performance_data: PerformanceData,
    pub state: State,
}

impl CheckResult {
    /// Builds a result from a raw plugin exit status and stdout, deriving
    /// `state` and splitting out performance data.
    pub fn from_plugin_output(
        schedule_start: Timestamp,
        schedule_end: Timestamp,
        execution_start: Timestamp,
        execution_end: Timestamp,
        exit_status: u32,
        raw_output: &str,
    ) -> Self {
        let (output, performance_data) = split_output(raw_output);
        Self {
            schedule_start,
            schedule_end,
            execution_start,
            execution_end,
            exit_status,
            output,
            performance_data,
            state: state_from_exit_status(exit_status),
        }
    }

    pub fn builder() -> CheckResultBuilder {
        CheckResultBuilder::default()
    }
}

/// Builder used by tests and by `vigil-mesh` when deserializing an inbound
/// `cluster::CheckResult` message, where fields arrive independently
/// rather than from a single plugin invocation.
#[derive(Debug, Default)]
pub struct CheckResultBuilder {
    schedule_start: Option<Timestamp>,
    schedule_end: Option<Timestamp>,
    execution_start: Option<Timestamp>,
    execution_end: Option<Timestamp>,
    exit_status: Option<u32>,
    output: String,
}

impl CheckResultBuilder {
    #[must_use]
    pub fn schedule_window(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.schedule_start = Some(start);
        self.schedule_end = Some(end);
        self
    }

    #[must_use]
    pub fn execution_window(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.execution_start = Some(start);
        self.execution_end = Some(end);
        self
    }

    #[must_use]
    pub fn exit_status(mut self, status: u32) -> Self {
        self.exit_status = Some(status);
        self
    }

    #[must_use]
    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn build(self) -> CheckResult {
        let now = Timestamp::now();
        CheckResult::from_plugin_output(
            self.schedule_start.unwrap_or(now),
            self.schedule_end.unwrap_or(now),
            self.execution_start.unwrap_or(now),
            self.execution_end.unwrap_or(now),
            self.exit_status.unwrap_or(3),
            &self.output,
        )
    }
}

/// Convenience accessor used by output sinks that want a flat map instead
/// of insertion-ordered pairs.
pub fn performance_data_as_map(perf: &PerformanceData) -> BTreeMap<String, String> {
    perf.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_output_and_perfdata_on_pipe() {
        let now = Timestamp::now();
        let result = CheckResult::from_plugin_output(
            now,
            now,
            now,
            now,
            0,
            "OK - load 0.3|load1=0.3;1;5",
        );

        assert_eq!(result.output, "OK - load 0.3");
        assert_eq!(result.performance_data.get("load1"), Some("0.3;1;5"));
        assert_eq!(result.state, State::Ok);
    }

    #[test]
    fn output_without_pipe_has_no_perfdata() {
        let now = Timestamp::now();
        let result = CheckResult::from_plugin_output(now, now, now, now, 2, "CRITICAL - down");
        assert_eq!(result.output, "CRITICAL - down");
        assert!(result.performance_data.is_empty());
        assert_eq!(result.state, State::Critical);
    }

    #[test]
    fn exit_status_mapping() {
        assert_eq!(state_from_exit_status(0), State::Ok);
        assert_eq!(state_from_exit_status(1), State::Warning);
        assert_eq!(state_from_exit_status(2), State::Critical);
        assert_eq!(state_from_exit_status(3), State::Unknown);
        assert_eq!(state_from_exit_status(128), State::Unknown);
    }

    #[test]
    fn multiline_output_appends_perfdata_in_line_order() {
        let now = Timestamp::now();
        let raw = "first line|a=1\nsecond line|b=2";
        let result = CheckResult::from_plugin_output(now, now, now, now, 0, raw);
        assert_eq!(result.output, "first line\nsecond line");
        assert_eq!(result.performance_data.get("a"), Some("1"));
        assert_eq!(result.performance_data.get("b"), Some("2"));
    }
}
