// weather_exporter - Prometheus metrics exporter for Netatmo and OpenWeather
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// A data source that can be refreshed by running one complete polling pass.
pub trait Updater: Send + Sync {
    /// Short name of the data source used in log messages.
    fn name(&self) -> &'static str;

    /// Run one pass. Failures are handled (logged) by the implementation, never returned.
    fn update(&self) -> impl Future<Output = ()> + Send;
}

/// Run `updater` immediately and then again `interval` after each pass finishes, until
/// `shutdown` becomes `true` or its sender is dropped.
///
/// Shutdown is only observed between passes: a pass that has already started runs to
/// completion before this returns.
pub async fn run<U: Updater>(updater: &U, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(
        message = "polling started",
        source = updater.name(),
        interval_secs = interval.as_secs_f64(),
    );

    let mut passes = 0u64;
    while !*shutdown.borrow() {
        updater.update().await;
        passes += 1;

        if !wait(interval, &mut shutdown).await {
            break;
        }
    }

    tracing::info!(message = "polling stopped", source = updater.name(), passes = passes);
}

/// Sleep for `interval`. Returns `false` as soon as shutdown is requested instead.
async fn wait(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(interval);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            biased;

            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
            _ = &mut sleep => return true,
        }
    }
}
