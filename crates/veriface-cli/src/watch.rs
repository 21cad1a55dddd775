//! Live capture loop: refresh a status line on every tick, verify on Enter.

use crate::engine::{EngineHandle, FrameStatus};
use crate::report::VerifyReport;
use anyhow::Result;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use veriface_core::Thresholds;

const INITIAL_LABEL: &str = "Verification Uninitiated";

/// What the user typed on one line of stdin.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Verify,
    Quit,
}

fn parse_command(line: &str) -> Command {
    match line.trim().to_ascii_lowercase().as_str() {
        "q" | "quit" | "exit" => Command::Quit,
        _ => Command::Verify,
    }
}

fn status_line(status: &FrameStatus, label: &str) -> String {
    let light = if status.is_dark { "dark" } else { "lit " };
    format!(
        "[frame {:>6}] {}x{} brightness {:>5.1} {light} | {label}",
        status.sequence, status.width, status.height, status.brightness
    )
}

/// Overwrite the current terminal line with the status line.
fn redraw_status(out: &mut impl Write, status: &FrameStatus, label: &str) -> std::io::Result<()> {
    write!(out, "\r\x1b[2K{}", status_line(status, label))?;
    out.flush()
}

pub async fn run(handle: EngineHandle, refresh: Duration, thresholds: Thresholds) -> Result<()> {
    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut label = INITIAL_LABEL.to_string();
    let mut stdout = std::io::stdout();

    println!("Press Enter to verify, q + Enter to quit.");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match handle.preview().await {
                    Ok(status) => {
                        redraw_status(&mut stdout, &status, &label)?;
                    }
                    Err(e) => tracing::warn!(error = %e, "preview capture failed"),
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if parse_command(&line) == Command::Quit {
                    break;
                }
                match handle.verify().await {
                    Ok(outcome) => {
                        let report = VerifyReport::new(&outcome, thresholds);
                        label = report.label().to_string();
                        println!("\r\x1b[2K{}", report.render_text());
                    }
                    Err(e) => {
                        label = "Verification failed".to_string();
                        tracing::error!(error = %e, "verification failed");
                        println!("\r\x1b[2KVerification failed: {e}");
                    }
                }
            }
        }
    }

    handle.shutdown().await;
    println!();
    Ok(())
}
