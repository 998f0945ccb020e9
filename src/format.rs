//! Output formatting utilities

use crate::delta::MatchStats;
use crate::engine::DeltaSummary;
use std::time::Duration;

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Format duration in human-readable format
pub fn format_duration(duration: Duration) -> String {
    format_duration_secs(duration.as_secs_f64())
}

/// Format duration from seconds
pub fn format_duration_secs(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining = secs - mins * 60.0;
        format!("{}m {:.0}s", mins as u64, remaining)
    } else {
        let hours = (secs / 3600.0).floor();
        let remaining = secs - hours * 3600.0;
        let mins = (remaining / 60.0).floor();
        format!("{}h {}m", hours as u64, mins as u64)
    }
}

/// Format transfer rate in human-readable format
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", human_bytes::human_bytes(bytes_per_sec))
}

/// Format percentage
pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Format a count with a unit
pub fn format_count(count: u64, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

/// Delta completion report
pub struct DeltaReport<'a> {
    pub src: &'a str,
    pub dest: &'a str,
    pub stats: &'a MatchStats,
    pub delta_size: u64,
    pub min_match_ratio: f64,
}

impl DeltaReport<'_> {
    /// Format the delta report
    pub fn format(&self) -> String {
        let stats = self.stats;
        let mut lines = Vec::new();

        lines.push("=== Delta Complete ===".to_string());
        lines.push(String::new());
        lines.push(format!("Source:       {}", self.src));
        lines.push(format!("Destination:  {}", self.dest));
        lines.push(format!("Duration:     {}", format_duration(stats.elapsed)));
        lines.push(format!("Block size:   {}", format_size(stats.block_size as u64)));
        lines.push(String::new());
        lines.push(format!("New file:     {}", format_size(stats.total_bytes)));
        lines.push(format!(
            "Reused:       {} in {}",
            format_size(stats.matched_bytes),
            format_count(stats.copy_ops, "copy", "copies")
        ));
        lines.push(format!(
            "Literal:      {} in {}",
            format_size(stats.literal_bytes()),
            format_count(stats.literal_ops, "run", "runs")
        ));
        lines.push(format!("Delta file:   {}", format_size(self.delta_size)));
        lines.push(format!(
            "Hit rate:     {} (threshold {})",
            format_percent(stats.savings_percent()),
            format_percent(self.min_match_ratio * 100.0)
        ));

        if stats.match_ratio() < self.min_match_ratio {
            lines.push(String::new());
            lines.push("Reuse rate is below the threshold; a full upload is cheaper".to_string());
        }

        let secs = stats.elapsed.as_secs_f64();
        if secs > 0.0 {
            lines.push(format!(
                "Scan rate:    {}",
                format_rate(stats.total_bytes as f64 / secs)
            ));
        }

        lines.join("\n")
    }

    /// Print the report to stdout
    pub fn print(&self) {
        println!("{}", self.format());
    }
}

/// Format the description of a BD file
pub fn format_summary(summary: &DeltaSummary) -> String {
    let payload = &summary.payload;
    [
        format!("Source:       {}", summary.src),
        format!("Destination:  {}", summary.dest),
        format!("MD5:          {}", summary.md5),
        format!(
            "Size:         {} (header {}, payload {})",
            format_size(summary.total_len),
            format_size(summary.header_len),
            format_size(summary.payload_len)
        ),
        format!("Block size:   {}", format_size(payload.block_size as u64)),
        format!(
            "Operations:   {}, {}",
            format_count(payload.copy_ops, "copy", "copies"),
            format_count(payload.literal_ops, "literal", "literals")
        ),
        format!(
            "Target:       {} ({} reused, {} literal)",
            format_size(payload.target_len()),
            format_size(payload.copy_bytes),
            format_size(payload.literal_bytes)
        ),
    ]
    .join("\n")
}
