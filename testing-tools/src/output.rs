use colored::*;
use std::time::Duration;

use harness::{Event, RequestOutcome};

#[derive(Debug)]
pub struct TestResult {
    pub scenario: String,
    pub passed: bool,
    pub message: Option<String>,
    pub duration: Duration,
}

impl TestResult {
    pub fn all_passed(results: &[TestResult]) -> bool {
        results.iter().all(|r| r.passed)
    }
}

pub fn print_step(message: &str) {
    println!("{} {}", "→".blue(), message);
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_failure(message: &str) {
    println!("{} {}", "✗".red(), message);
}

pub fn print_event(user_label: &str, event: &Event) {
    println!(
        "\n[{}] {} event received after {} ms",
        label_colored(user_label).bold(),
        event.name.yellow(),
        event.elapsed_ms
    );

    if let Ok(pretty) = serde_json::to_string_pretty(event.body()) {
        println!("   {}", pretty.dimmed());
    }
}

pub fn print_response(user_label: &str, outcome: &RequestOutcome) {
    println!(
        "\n[{}] '{}' returned in {} ms",
        label_colored(user_label).bold(),
        outcome.event_name().unwrap_or_default().yellow(),
        outcome.elapsed_ms
    );

    if let Ok(pretty) = serde_json::to_string_pretty(outcome.body()) {
        println!("   {}", pretty.dimmed());
    }
}

fn label_colored(user_label: &str) -> ColoredString {
    if user_label.contains("User 1") {
        user_label.bright_blue()
    } else {
        user_label.bright_magenta()
    }
}

pub fn print_test_summary(results: &[TestResult]) {
    println!("\n{}", "=== TEST SUMMARY ===".bright_white().bold());

    let total = results.len();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = total - passed;

    for result in results {
        let status = if result.passed {
            "PASS".green().bold()
        } else {
            "FAIL".red().bold()
        };

        println!("[{}] {} ({:?})", status, result.scenario, result.duration);

        if let Some(msg) = &result.message {
            println!("      {}", msg.dimmed());
        }
    }

    println!(
        "\n{}: {} passed, {} failed",
        "Results".bold(),
        passed.to_string().green(),
        failed.to_string().red()
    );
}
