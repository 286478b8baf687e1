//! Human-readable summary of a finished pipeline run

use crate::pipeline::RunReport;

/// Prints a run report to stdout
pub fn print_run_report(report: &RunReport) {
    println!("=== Harvest Report ===\n");

    println!("Courses:");
    println!("  Requested: {}", report.requested);
    if report.skipped_known > 0 {
        println!("  Skipped (already stored): {}", report.skipped_known);
    }
    println!("  Harvested: {}", report.harvested);
    println!("  Failed: {}", report.failures.len());
    println!();

    println!("Written:");
    println!(
        "  Courses: {} new, {} refreshed",
        report.courses.inserted, report.courses.refreshed
    );
    println!(
        "  Users: {} new, {} refreshed",
        report.users.inserted, report.users.refreshed
    );
    println!(
        "  Reviews: {} new, {} refreshed, {} orphaned",
        report.reviews.inserted, report.reviews.refreshed, report.reviews.orphaned
    );

    if !report.failures.is_empty() {
        println!();
        println!("Failures:");
        for failure in &report.failures {
            println!("  - [{}] {}: {}", failure.kind, failure.url, failure.error);
        }
    }

    if !report.run_ids.is_empty() {
        println!();
        let ids: Vec<String> = report.run_ids.iter().map(i64::to_string).collect();
        println!("Recorded as run(s): {}", ids.join(", "));
    }
}
