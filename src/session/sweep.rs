use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::manager::WindowState;

/// Periodically expire sessions until cancelled
pub(crate) async fn sweep_loop(state: Arc<WindowState>, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(state.config.sweep_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let emitted = state.sweep(&cancel_token).await;
                if emitted > 0 {
                    log::debug!("sweep emitted {emitted} completed session(s)");
                }
            }
            _ = cancel_token.cancelled() => {
                log::info!("session sweep loop shutting down");
                break;
            }
        }
    }
}
