use crate::config::Config;
use crate::encoder::PairingDisplay;
use crate::initiator::{Initiator, InitiatorSnapshot, PairingHandle, Phase, render_result};
use crate::store::SharedStore;
use crate::terminal::cli::OpenArgs;
use crate::terminal::error::CliError;
use std::path::Path;
use tracing::info;

pub async fn run(config: &Config, store: SharedStore, args: OpenArgs) -> Result<(), CliError> {
    let task = args.task();
    let initiator = Initiator::new(store, config.initiator_settings());
    let handle = initiator
        .open_pairing(&task, |result| {
            info!(target: "gradelink::cli", grade = %result.grade, "result delivered");
        })
        .await?;
    show_pairing(&handle, args.qr_out.as_deref())?;
    follow(&handle).await
}

pub(super) fn show_pairing(handle: &PairingHandle, qr_out: Option<&Path>) -> Result<(), CliError> {
    match handle.display() {
        Some(PairingDisplay::Code { image, terminal }) => {
            println!("{terminal}");
            println!("📱 Scan this code with your phone to photograph your work.");
            if let Some(path) = qr_out {
                std::fs::write(path, image.png())?;
                println!("🖼️  QR code written to {}", path.display());
            }
        }
        Some(PairingDisplay::TextFallback { url, reason }) => {
            println!("⚠️  Could not draw the QR code ({reason}).");
            println!("📱 Open this link on your phone instead:\n{url}");
        }
        None => return Err(CliError::InvalidArgument("pairing already closed".into())),
    }
    Ok(())
}

/// Prints status changes until the pairing settles or Ctrl-C closes it.
pub(super) async fn follow(handle: &PairingHandle) -> Result<(), CliError> {
    let mut updates = handle.subscribe();
    let mut last_status = "";
    let mut last_minute = None;
    loop {
        let snapshot = updates.borrow_and_update().clone();
        let status = snapshot.status_line();
        if status != last_status {
            println!("{status}");
            last_status = status;
        }
        let minute = snapshot.remaining_secs / 60;
        if !snapshot.expired && !snapshot.phase.is_terminal() && last_minute != Some(minute) {
            println!("⏳ {}", snapshot.countdown_label());
            last_minute = Some(minute);
        }
        if snapshot.is_settled() {
            return outcome(&snapshot);
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return outcome(&handle.snapshot());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                handle.close();
                println!("Pairing closed.");
                return Ok(());
            }
        }
    }
}

fn outcome(snapshot: &InitiatorSnapshot) -> Result<(), CliError> {
    match &snapshot.phase {
        Phase::Completed(result) => {
            println!("✅ {}", render_result(result));
            Ok(())
        }
        Phase::Failed => Err(CliError::GradingFailed),
        _ if snapshot.closed => Ok(()),
        _ => Err(CliError::Expired),
    }
}
