//! Plain-text rendering for CLI commands

use humansize::{format_size, BINARY};

use crate::core::envelope::{CloseEnvelope, DiagnosticsEnvelope};
use crate::diagnostics::{CacheLocation, ProcessSample};
use crate::events::{Event, Report};
use crate::remediation::{CleanReport, RemediationDetails, RemediationResult};
use crate::scheduler::ScheduledTask;

pub fn print_issues(envelope: &DiagnosticsEnvelope) {
    if let Some(err) = &envelope.error {
        eprintln!("Diagnostics failed: {err}");
        return;
    }
    if envelope.issues.is_empty() {
        println!("No issues found.");
        return;
    }

    println!("{:<8} {:<26} {:<12} FIX", "SEVERITY", "ID", "CATEGORY");
    println!("{}", "-".repeat(60));
    for issue in &envelope.issues {
        println!(
            "{:<8} {:<26} {:<12} {}",
            issue.severity.to_string(),
            issue.id(),
            issue.category.to_string(),
            if issue.can_fix { "yes" } else { "no" }
        );
    }

    for issue in &envelope.issues {
        println!("\n{} ({})", issue.description, issue.id());
        if !issue.details.is_empty() {
            println!("  {}", issue.details);
        }
        println!("  -> {}", issue.recommendation);
    }
}

pub fn print_remediation(result: &RemediationResult) {
    println!("[{}] {}", result.outcome, result.message);

    match &result.details {
        Some(RemediationDetails::CacheClean(report)) => print_clean_report(report),
        Some(RemediationDetails::DiskClean { cache, large_files }) => {
            print_clean_report(cache);
            if !large_files.is_empty() {
                println!("\nLarge files you may want to remove:");
                for file in large_files {
                    println!(
                        "  {:>10}  {}",
                        format_size(file.size_bytes, BINARY),
                        file.path.display()
                    );
                }
            }
        }
        None => {}
    }
}

pub fn print_clean_report(report: &CleanReport) {
    if !report.cleaned.is_empty() {
        println!("{:<10} {:<8} {:<10} PATH", "FREED", "FILES", "PROTECTED");
        println!("{}", "-".repeat(60));
        for cleaned in &report.cleaned {
            println!(
                "{:<10} {:<8} {:<10} {}",
                format_size(cleaned.bytes_freed, BINARY),
                cleaned.files_removed,
                cleaned.files_protected,
                cleaned.path.display()
            );
        }
    }
    for skipped in &report.skipped {
        println!("skipped {}: {}", skipped.path.display(), skipped.reason);
    }
}

pub fn print_close(envelope: &CloseEnvelope) {
    match &envelope.error {
        Some(err) => eprintln!("{err}"),
        None => println!("{}", envelope.result.message),
    }
}

pub fn print_processes(processes: &[&ProcessSample]) {
    println!("{:<8} {:<28} {:>8} {:>8}", "PID", "NAME", "CPU%", "MEM%");
    println!("{}", "-".repeat(56));
    for p in processes {
        println!(
            "{:<8} {:<28} {:>8.1} {:>8.1}",
            p.pid,
            truncate(&p.name, 28),
            p.cpu_percent,
            p.memory_percent
        );
    }
}

pub fn print_cache_locations(locations: &[CacheLocation]) {
    if locations.is_empty() {
        println!("No cache locations found.");
        return;
    }

    println!("{:<10} {:<20} PATH", "SIZE", "MODIFIED");
    println!("{}", "-".repeat(60));
    for loc in locations {
        let modified = loc
            .last_modified
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<20} {}",
            format_size(loc.size_bytes, BINARY),
            modified,
            loc.path.display()
        );
    }
    let total: u64 = locations.iter().map(|l| l.size_bytes).sum();
    println!("\nTotal: {}", format_size(total, BINARY));
}

pub fn print_history(events: &[Event]) {
    if events.is_empty() {
        println!("No events recorded.");
        return;
    }

    println!("{:<20} {:<20} {:<8} DESCRIPTION", "TIME", "KIND", "SEVERITY");
    println!("{}", "-".repeat(80));
    for event in events {
        println!(
            "{:<20} {:<20} {:<8} {}",
            event
                .timestamp
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            event.kind.to_string(),
            event.severity.to_string(),
            event.description
        );
    }
}

pub fn print_report(report: &Report) {
    println!(
        "Report {} to {}",
        report.period_start.format("%Y-%m-%d"),
        report.period_end.format("%Y-%m-%d")
    );
    println!("Total events: {}", report.summary.total_events);

    println!("\nBy type:");
    for (kind, count) in &report.summary.events_by_type {
        println!("  {:<20} {}", kind.to_string(), count);
    }
    println!("\nBy severity:");
    for (severity, count) in &report.summary.events_by_severity {
        println!("  {:<20} {}", severity.to_string(), count);
    }
}

pub fn print_schedule(tasks: &[ScheduledTask]) {
    println!("{:<22} {:<22} ENABLED", "TASK", "WHEN");
    println!("{}", "-".repeat(54));
    for task in tasks {
        println!(
            "{:<22} {:<22} {}",
            task.task.to_string(),
            task.describe(),
            if task.enabled { "yes" } else { "no" }
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
