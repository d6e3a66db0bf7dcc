use std::time::Duration;

use crossterm::event::{Event, EventStream};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum AppEvent {
    Input(Event),
    Tick, // Drives status message expiry
}

/// Forward terminal input and periodic ticks into `tx` until `token` is cancelled
pub fn spawn_input_task(
    tx: mpsc::Sender<AppEvent>,
    tick_rate: Duration,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut event_stream = EventStream::new();
        let mut ticker = tokio::time::interval(tick_rate);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event_result = event_stream.next() => match event_result {
                    Some(Ok(event)) => AppEvent::Input(event),
                    Some(Err(e)) => {
                        tracing::error!("Terminal input error: {}", e);
                        break;
                    }
                    None => break,
                },
                _ = ticker.tick() => AppEvent::Tick,
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
        tracing::debug!("Input task stopped");
    })
}
