//! Output formatting for one-shot commands

use anyhow::Error;
use colored::*;
use serde_json::json;
use watertank_ota::prelude::*;

use crate::file_flash::FlashStatus;

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to format output as JSON: {}", e),
    }
}

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    print_json(&json!({
        "success": false,
        "error": {
            "message": error.to_string(),
        }
    }));
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

/// JSON body for a version check result
pub fn check_outcome_json(running: &str, outcome: &VersionCheckOutcome) -> serde_json::Value {
    match outcome {
        VersionCheckOutcome::UpToDate { latest_version } => json!({
            "success": true,
            "runningVersion": running,
            "latestVersion": latest_version,
            "updateAvailable": false,
        }),
        VersionCheckOutcome::UpdateAvailable(descriptor) => json!({
            "success": true,
            "runningVersion": running,
            "updateAvailable": true,
            "update": descriptor,
        }),
    }
}

pub fn print_check_outcome(running: &str, outcome: &VersionCheckOutcome, json: bool) {
    if json {
        print_json(&check_outcome_json(running, outcome));
        return;
    }

    match outcome {
        VersionCheckOutcome::UpToDate { latest_version } => {
            println!(
                "{} {} (published {})",
                "Up to date:".green().bold(),
                running,
                latest_version
            );
        }
        VersionCheckOutcome::UpdateAvailable(descriptor) => {
            println!("{}", "Update available".yellow().bold());
            println!("  Running: {}", running);
            println!("  Latest:  {}", descriptor.latest_version);
            println!("  Blob:    {} ({} bytes)", descriptor.blob_name, descriptor.blob_size);
        }
    }
}

pub fn print_status(firmware_version: &str, status: &FlashStatus, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "firmwareVersion": firmware_version,
            "flash": status,
        }));
        return;
    }

    println!("{}", "Device Status:".bold());
    println!("  Firmware:  {}", firmware_version);
    println!("  Running:   {}", status.running);
    if status.boot == status.running {
        println!("  Boot:      {}", status.boot);
    } else {
        println!("  Boot:      {} {}", status.boot, "(differs from running)".yellow());
    }
    println!("  Slot A:    {} bytes", status.slot_a_bytes);
    println!("  Slot B:    {} bytes", status.slot_b_bytes);
    println!("  Updated:   {}", status.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
}

pub fn print_success(message: &str, json: bool) {
    if json {
        print_json(&json!({ "success": true, "message": message }));
    } else {
        println!("{} {}", "✓".green(), message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_up_to_date_json_carries_published_version() {
        let outcome = VersionCheckOutcome::UpToDate {
            latest_version: "9.0.0.0".into(),
        };
        let body = check_outcome_json("9.0.0.0", &outcome);
        assert_eq!(body["updateAvailable"], false);
        assert_eq!(body["latestVersion"], "9.0.0.0");
        assert!(body.get("update").is_none());
    }

    #[test]
    fn test_update_available_json_embeds_descriptor() {
        let outcome = VersionCheckOutcome::UpdateAvailable(UpdateDescriptor {
            latest_version: "9.1.0.0".into(),
            blob_name: "esp32-9.1.0.0.bin".into(),
            blob_size: 2048,
        });
        let body = check_outcome_json("9.0.0.0", &outcome);
        assert_eq!(body["updateAvailable"], true);
        assert_eq!(body["runningVersion"], "9.0.0.0");
        assert_eq!(body["update"]["blob_size"], 2048);
    }
}
