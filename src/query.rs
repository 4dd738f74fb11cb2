//! PromQL expressions for the probe series.

/// Names of the series and label the reports read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesNames {
    pub success: String,
    pub duration: String,
    pub instance_label: String,
}

impl Default for SeriesNames {
    fn default() -> Self {
        SeriesNames {
            success: "probe_success".to_string(),
            duration: "probe_duration_seconds".to_string(),
            instance_label: "instance".to_string(),
        }
    }
}

impl SeriesNames {
    /// `series{instance="target"}`
    pub fn selector(&self, series: &str, target: &str) -> String {
        format!(
            "{}{{{}=\"{}\"}}",
            series,
            self.instance_label,
            escape_label_value(target)
        )
    }

    /// `series{instance=~"a|b"}` with every target matched literally.
    pub fn group_selector(&self, series: &str, targets: &[String]) -> String {
        let alternatives = targets
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        format!(
            "{}{{{}=~\"{}\"}}",
            series,
            self.instance_label,
            escape_label_value(&alternatives)
        )
    }

    pub fn success_selector(&self, target: &str) -> String {
        self.selector(&self.success, target)
    }

    pub fn duration_selector(&self, target: &str) -> String {
        self.selector(&self.duration, target)
    }

    /// Percentage of successful probes over the `window_secs` ending at the
    /// evaluation time.
    pub fn uptime_over(&self, target: &str, window_secs: i64) -> String {
        format!(
            "avg_over_time({}[{}s]) * 100",
            self.success_selector(target),
            window_secs
        )
    }

    /// Group-wide one-minute average of `series`, collapsed to one series.
    pub fn group_average(&self, series: &str, targets: &[String]) -> String {
        format!(
            "avg(avg_over_time({}[1m]))",
            self.group_selector(series, targets)
        )
    }

    /// `avg`, `max` or `min` of the probe duration for one target.
    pub fn duration_stat(&self, function: &str, target: &str) -> String {
        format!("{}({})", function, self.duration_selector(target))
    }
}

/// Escapes a string for use inside a double-quoted PromQL label value.
pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}
