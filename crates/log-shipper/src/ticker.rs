// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Calls `on_tick` with an increasing counter every `interval` until the
/// returned token is cancelled. The first tick fires after one full interval.
///
/// Must be called from within a tokio runtime.
pub fn start_interval<F>(period: Duration, mut on_tick: F) -> CancellationToken
where
    F: FnMut(u64) + Send + 'static,
{
    let cancel_token = CancellationToken::new();
    let stop = cancel_token.clone();
    tokio::spawn(async move {
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval completes its first tick immediately
        ticker.tick().await;

        let mut count = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    on_tick(count);
                    count += 1;
                }
                () = stop.cancelled() => {
                    debug!("Ticker stopped after {count} ticks");
                    break;
                }
            }
        }
    });
    cancel_token
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_ticks_count_up_until_cancelled() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cancel_token = start_interval(Duration::from_millis(20), move |i| {
            sink.lock().unwrap().push(i);
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel_token.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_cancel = seen.lock().unwrap().clone();

        assert!(after_cancel.len() >= 3, "got {after_cancel:?}");
        let expected: Vec<u64> = (0..after_cancel.len() as u64).collect();
        assert_eq!(after_cancel, expected);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*seen.lock().unwrap(), after_cancel);
    }

    #[tokio::test]
    async fn test_first_tick_waits_one_interval() {
        let seen = Arc::new(Mutex::new(0u64));
        let sink = Arc::clone(&seen);
        let cancel_token = start_interval(Duration::from_secs(60), move |_| {
            *sink.lock().unwrap() += 1;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel_token.cancel();

        assert_eq!(*seen.lock().unwrap(), 0);
    }
}
