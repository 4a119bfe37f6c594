//! Process signals as a cancellation gate for the download run.
//!
//! The first SIGINT, SIGTERM or SIGHUP closes the gate: the scheduler stops
//! launching items, skips any rate-limit cooldown and lets the batch in
//! flight drain. A second signal exits at once with status 130.

use tokio_util::sync::CancellationToken;

/// Register signal listeners and return the gate they close.
///
/// Registration happens before this returns, so a failure to listen is an
/// error for the caller rather than a silent no-op.
pub(crate) fn install_signal_handler() -> std::io::Result<CancellationToken> {
    let gate = CancellationToken::new();

    #[cfg(unix)]
    let (mut sigterm, mut sighup) = {
        use tokio::signal::unix::{signal, SignalKind};
        (
            signal(SignalKind::terminate())?,
            signal(SignalKind::hangup())?,
        )
    };

    let closer = gate.clone();
    tokio::spawn(async move {
        let mut seen = false;
        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                    _ = sighup.recv() => {}
                }
            }

            #[cfg(not(unix))]
            {
                if tokio::signal::ctrl_c().await.is_err() {
                    tracing::warn!("Ctrl+C listener unavailable, signals will be ignored");
                    return;
                }
            }

            if std::mem::replace(&mut seen, true) {
                tracing::warn!("Second signal, exiting without waiting for the batch");
                std::process::exit(130);
            }
            tracing::info!("Stopping after the current batch (signal again to quit now)");
            closer.cancel();
        }
    });

    Ok(gate)
}
