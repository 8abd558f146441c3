//! Terminal output formatting with colors and box drawing.

use colored::Colorize;

use crate::result::{Diagnostic, RecoveryResult, RoundReport};
use crate::statistics::AggregateScore;
#[cfg(feature = "remote")]
use crate::error::OracleError;
#[cfg(feature = "remote")]
use crate::statistics::OnlineStats;
#[cfg(feature = "remote")]
use crate::survey::{Observation, SummaryRow};

/// One progress line per round.
pub fn format_round(report: &RoundReport) -> String {
    let mut line = format!(
        "round {:>3}  {}  chose {:?}",
        report.round,
        format!("{:?}", report.prefix).bold(),
        report.chosen
    );
    if let Some(gap) = report.ranking.gap_ns {
        line.push_str(&format!("  gap {:.1} ns", gap));
    }
    if let Some(separation) = report.ranking.separation {
        line.push_str(&format!("  sep {}", format_separation(separation)));
    }
    if report.failed_trials > 0 {
        line.push_str(&format!(
            "  {}",
            format!("{} failed", report.failed_trials).yellow()
        ));
    }
    for diagnostic in &report.diagnostics {
        let warning = "\u{26A0}".yellow();
        line.push_str(&format!("\n    {} {}", warning, diagnostic_label(diagnostic)));
    }
    line
}

/// Ranking table of a round, best candidates first.
pub fn format_ranking(report: &RoundReport, top: usize) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "  {:<6} {:>14} {:>12} {:>8} {:>6}\n",
        "symbol", "mean diff ns", "std dev ns", "samples", "failed"
    ));
    for (i, score) in report.ordered_scores().into_iter().take(top).enumerate() {
        let row = format_score(score);
        if i == 0 {
            output.push_str(&format!("  {}\n", row.green()));
        } else {
            output.push_str(&format!("  {}\n", row));
        }
    }
    output
}

fn format_score(score: &AggregateScore) -> String {
    format!(
        "{:<6} {:>14.1} {:>12.1} {:>8} {:>6}",
        format!("{:?}", score.symbol()),
        score.mean_time_diff_ns,
        score.std_dev_ns,
        score.sample_count,
        score.failed_count
    )
}

/// Format a RecoveryResult for human-readable terminal output.
pub fn format_result(result: &RecoveryResult) -> String {
    let mut output = String::new();
    let sep = "\u{2500}".repeat(62);

    output.push_str("timing-recover\n");
    output.push_str(&sep);
    output.push_str("\n\n");

    output.push_str(&format!(
        "  Rounds: {} \u{00D7} {} candidates \u{00D7} {} trials\n",
        result.rounds.len(),
        result.metadata.alphabet_size,
        result.metadata.trials_per_candidate
    ));
    if let Some(cpu) = result.metadata.pinned_cpu {
        output.push_str(&format!("  Pinned to CPU {}\n", cpu));
    }
    output.push_str(&format!("  Runtime: {:.2} s\n\n", result.metadata.runtime_secs));

    if result.is_confident() {
        output.push_str(&format!("  {}\n", "\u{2713} Secret recovered".green().bold()));
    } else {
        output.push_str(&format!(
            "  {}\n",
            "\u{26A0} Secret recovered with weak rounds".yellow().bold()
        ));
    }
    output.push_str(&format!("    {}\n", format!("{:?}", result.secret).bold()));

    let weak: Vec<String> = result
        .diagnostics()
        .map(|(round, d)| format!("    round {}: {}", round, diagnostic_label(d)))
        .collect();
    if !weak.is_empty() {
        output.push('\n');
        for line in weak {
            output.push_str(&line);
            output.push('\n');
        }
    }

    let failed = result.failed_trials();
    if failed > 0 {
        output.push_str(&format!("\n    Excluded trials: {}\n", failed));
    }

    output.push('\n');
    output.push_str(&sep);
    output.push('\n');
    output
}

/// Survey summary table, one row per label/status/size group.
#[cfg(feature = "remote")]
pub fn format_summary(rows: &[SummaryRow]) -> String {
    let width = rows.iter().map(|r| r.label.len()).max().unwrap_or(5).max(5);
    let mut output = format!(
        "{:<width$} {:>6} {:>8} {:>9} {:>5} {:>12} {:>12}\n",
        "label",
        "status",
        "size",
        "cachebust",
        "n",
        "mean ms",
        "std ms",
        width = width
    );
    for row in rows {
        let status = match row.status {
            200..=299 => row.status.to_string().green(),
            300..=399 => row.status.to_string().cyan(),
            _ => row.status.to_string().red(),
        };
        output.push_str(&format!(
            "{:<width$} {:>6} {:>8} {:>9} {:>5} {:>12.3} {:>12.3}\n",
            row.label,
            status,
            row.size,
            row.cachebust,
            row.count,
            row.mean_ns / 1e6,
            row.std_dev_ns / 1e6,
            width = width
        ));
    }
    output
}

fn format_separation(separation: f64) -> String {
    if separation.is_infinite() {
        "\u{221E}".green().to_string()
    } else if separation >= 2.0 {
        format!("{:.1}", separation).green().to_string()
    } else {
        format!("{:.1}", separation).yellow().to_string()
    }
}

fn diagnostic_label(diagnostic: &Diagnostic) -> String {
    match diagnostic {
        Diagnostic::AmbiguousRanking { symbols } => format!("tie between {:?}", symbols),
        Diagnostic::StarvedSignal {
            separation,
            required,
        } => format!("weak signal ({:.2} < {:.2})", separation, required),
    }
}

/// One line per watched request: the response and the running statistics.
#[cfg(feature = "remote")]
pub fn format_watch(tick: Result<&Observation, &OracleError>, stats: &OnlineStats) -> String {
    match tick {
        Ok(obs) => format!(
            "#{:<5} {:>3} {:>8}B {:>10.3} ms   mean {:.3} ms  sd {:.3} ms  n {}",
            obs.test,
            obs.status,
            obs.size,
            obs.duration.as_nanos() as f64 / 1e6,
            stats.mean() / 1e6,
            stats.std_dev() / 1e6,
            stats.count()
        ),
        Err(error) => format!("{} {}", "failed".red(), error),
    }
}
