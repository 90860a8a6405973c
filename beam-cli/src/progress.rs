//! Console rendering of the engine's progress stream.

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use beam_core::transfer::{ProgressReporter, ProgressUpdate, TransferSummary};

/// Drive a progress bar from the update channel until the transfer
/// completes or the channel closes. Returns the summary on completion.
pub async fn render(rx: mpsc::Receiver<ProgressUpdate>) -> Option<TransferSummary> {
    let mut bar: Option<ProgressBar> = None;
    ProgressReporter::new()
        .run(rx, move |obs| {
            let b = bar.get_or_insert_with(|| new_bar(obs.total, &obs.name));
            b.set_position(obs.cumulative);
            if obs.cumulative >= obs.total {
                b.finish_and_clear();
            }
        })
        .await
}

fn new_bar(total: u64, name: &str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let template = "{msg} {bar:32} {bytes}/{total_bytes} ({bytes_per_sec})";
    if let Ok(style) = ProgressStyle::with_template(template) {
        bar.set_style(style);
    }
    bar.set_message(name.to_string());
    bar
}

/// The single success line: bytes, duration, average throughput,
/// checksum.
pub fn summary_line(verb: &str, summary: &TransferSummary) -> String {
    format!(
        "{verb} {}: {} in {:.1}s ({}/s), sha256 {}",
        summary.name,
        human_bytes(summary.bytes as f64),
        summary.duration.as_secs_f64(),
        human_bytes(summary.throughput),
        summary.checksum,
    )
}

fn human_bytes(n: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = n;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", value as u64, UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(0.0), "0 B");
        assert_eq!(human_bytes(512.0), "512 B");
        assert_eq!(human_bytes(2048.0), "2.0 KiB");
        assert_eq!(human_bytes(3.0 * 1024.0 * 1024.0), "3.0 MiB");
    }

    #[test]
    fn summary_line_contains_everything() {
        let summary = TransferSummary {
            name: "file.bin".to_string(),
            bytes: 3 * 1024 * 1024,
            duration: Duration::from_secs(2),
            throughput: 1.5 * 1024.0 * 1024.0,
            checksum: "ab".repeat(32),
        };
        let line = summary_line("sent", &summary);
        assert!(line.starts_with("sent file.bin"));
        assert!(line.contains("3.0 MiB"));
        assert!(line.contains("2.0s"));
        assert!(line.contains("1.5 MiB/s"));
        assert!(line.contains(&"ab".repeat(32)));
    }
}
