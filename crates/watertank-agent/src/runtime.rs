//! Device main loop
//!
//! Cloud commands arrive one per line on the input stream and only raise
//! flags. The loop consumes them on the next wake-up: either a reporting
//! tick or a notification from the reader task.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use watertank_ota::prelude::*;

/// Reported properties as the JSON document sent to the cloud
pub fn reported_state_json(service: &UpdateService) -> Result<String> {
    serde_json::to_string(&service.reported_state()).context("Failed to serialize reported state")
}

async fn read_commands<R>(input: R, flags: Arc<CommandFlags>, wake: Arc<Notify>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if flags.handle_message(line.as_bytes()).is_some() {
                    wake.notify_one();
                }
            }
            Ok(None) => {
                debug!("Command input closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Command input failed");
                break;
            }
        }
    }
}

/// Run until a `Quit` command arrives
pub async fn run_loop<R>(
    service: Arc<UpdateService>,
    flags: Arc<CommandFlags>,
    input: R,
    interval: Duration,
) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let wake = Arc::new(Notify::new());
    let reader = tokio::spawn(read_commands(input, Arc::clone(&flags), Arc::clone(&wake)));

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_secs = interval.as_secs(), "Device loop started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reported = reported_state_json(&service)?;
                info!(reported = %reported, state = %service.progress().session_state(), "Reported state");
            }
            _ = wake.notified() => {}
        }

        if service.dispatch(&flags).await == LoopControl::Stop {
            break;
        }
    }

    reader.abort();
    info!("Device loop stopped");
    Ok(())
}
