// weather_collector - Periodic collector of OpenWeather observations
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

use crate::client::WeatherSource;
use crate::metrics::CollectorMetrics;
use crate::observation::{EntitySet, Observation};
use crate::store::ObservationStore;
use chrono::{DateTime, Local};
use futures::FutureExt;
use std::any::Any;
use std::error;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(600);

/// Failure that escaped the per-city error handling of a cycle.
#[derive(Debug)]
pub enum CycleError {
    Panicked(String),
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panicked(msg) => write!(f, "cycle panicked: {}", msg),
        }
    }
}

impl error::Error for CycleError {}

/// Counts for a single pass over every configured city.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub observations: usize,
    pub fetch_errors: usize,
    pub store_errors: usize,
}

/// Periodically fetches current conditions for each city and appends one
/// observation per city to the store.
///
/// Cities are processed one at a time in configured order. A failed fetch is
/// recorded as an error observation and a failed write is logged, neither
/// stops the cycle. After each cycle the collector sleeps for a fixed interval
/// regardless of how the cycle went. A crash part way through a cycle leaves
/// the cities already written in place; there is no rollback.
pub struct Collector<S, W> {
    source: S,
    store: W,
    entities: EntitySet,
    interval: Duration,
    metrics: Arc<CollectorMetrics>,
    clock: fn() -> DateTime<Local>,
}

impl<S, W> Collector<S, W>
where
    S: WeatherSource,
    W: ObservationStore,
{
    pub fn new(source: S, store: W, entities: EntitySet, interval: Duration, metrics: Arc<CollectorMetrics>) -> Self {
        Collector {
            source,
            store,
            entities,
            interval,
            metrics,
            clock: Local::now,
        }
    }

    /// Replace the clock used to timestamp observations.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Local>) -> Self {
        self.clock = clock;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &W {
        &self.store
    }

    /// Fetch, build, and write one observation for every city, in order.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for (city, key) in self.entities.iter() {
            let now = (self.clock)();
            let result = self.source.fetch(city).await;
            if let Err(e) = &result {
                tracing::warn!(message = "failed to fetch current weather", city = %city, error = %e);
                report.fetch_errors += 1;
            }

            let obs = Observation::build(city, result, now);
            self.metrics.observation(key, &obs);
            report.observations += 1;

            match self.store.append(key, &obs) {
                Ok(()) => {
                    tracing::info!(message = "data inserted", city = %city, key = %key, success = obs.is_success());
                }
                Err(e) => {
                    tracing::error!(message = "failed to store observation", city = %city, key = %key, error = %e);
                    self.metrics.store_error(key);
                    report.store_errors += 1;
                }
            }
        }

        report
    }

    /// Run a cycle, converting a panic anywhere inside it into a `CycleError`.
    pub async fn guarded_cycle(&self) -> Result<CycleReport, CycleError> {
        AssertUnwindSafe(self.run_cycle())
            .catch_unwind()
            .await
            .map_err(|p| CycleError::Panicked(panic_message(p)))
    }

    /// Run cycles until `shutdown` receives a value or its sender is dropped.
    ///
    /// The stop signal is checked between cycles: a cycle that has started is
    /// always finished.
    pub async fn run(&self, mut shutdown: watch::Receiver<()>) {
        tracing::info!(
            message = "collection started",
            cities = self.entities.len(),
            interval_secs = self.interval.as_secs(),
        );

        loop {
            match self.guarded_cycle().await {
                Ok(report) => {
                    self.metrics.cycle_completed();
                    tracing::info!(
                        message = "updated all cities",
                        at = %Local::now().to_rfc3339(),
                        observations = report.observations,
                        fetch_errors = report.fetch_errors,
                        store_errors = report.store_errors,
                    );
                }
                Err(e) => {
                    self.metrics.cycle_failed();
                    tracing::error!(message = "collection cycle failed", error = %e);
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    tracing::info!("collection stopped");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, Conditions};
    use crate::observation::{EntityKey, Reading};
    use crate::store::StoreError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[derive(Default)]
    struct FakeSource {
        readings: HashMap<String, (f64, String)>,
        calls: Mutex<Vec<String>>,
        panic_once: AtomicBool,
    }

    impl FakeSource {
        fn with(readings: &[(&str, f64, &str)]) -> Self {
            FakeSource {
                readings: readings
                    .iter()
                    .map(|(c, t, d)| (c.to_string(), (*t, d.to_string())))
                    .collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl WeatherSource for FakeSource {
        async fn fetch(&self, city: &str) -> Result<Conditions, ClientError> {
            self.calls.lock().unwrap().push(city.to_owned());
            if self.panic_once.swap(false, Ordering::SeqCst) {
                panic!("upstream exploded");
            }

            match self.readings.get(city) {
                Some((temperature, description)) => Ok(Conditions {
                    temperature: *temperature,
                    description: description.clone(),
                }),
                None => Err(ClientError::Malformed("city not found".to_owned())),
            }
        }
    }

    #[derive(Default)]
    struct FakeStore {
        written: Mutex<Vec<(EntityKey, Observation)>>,
        fail_for: Option<String>,
    }

    impl FakeStore {
        fn for_key(&self, key: &str) -> Vec<Observation> {
            self.written
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| k.as_str() == key)
                .map(|(_, o)| o.clone())
                .collect()
        }

        fn len(&self) -> usize {
            self.written.lock().unwrap().len()
        }
    }

    impl ObservationStore for FakeStore {
        fn append(&self, key: &EntityKey, obs: &Observation) -> Result<(), StoreError> {
            if self.fail_for.as_deref() == Some(key.as_str()) {
                return Err(StoreError::Unavailable("connection refused".to_owned()));
            }

            self.written.lock().unwrap().push((key.clone(), obs.clone()));
            Ok(())
        }
    }

    fn collector(source: FakeSource, store: FakeStore, cities: &[&str]) -> Collector<FakeSource, FakeStore> {
        Collector::new(
            source,
            store,
            EntitySet::new(cities).unwrap(),
            Duration::from_millis(1),
            Arc::new(CollectorMetrics::default()),
        )
        .with_clock(fixed_now)
    }

    #[tokio::test]
    async fn test_cycle_success_and_failure() {
        let source = FakeSource::with(&[("london", 15.2, "cloudy")]);
        let collector = collector(source, FakeStore::default(), &["london", "delhi"]);

        let report = collector.run_cycle().await;
        assert_eq!(
            CycleReport {
                observations: 2,
                fetch_errors: 1,
                store_errors: 0
            },
            report
        );

        let london = collector.store().for_key("london");
        assert_eq!(1, london.len());
        assert_eq!(
            Reading::Conditions {
                temperature: 15.2,
                description: "cloudy".to_owned()
            },
            london[0].reading
        );
        assert_eq!(fixed_now(), london[0].captured_at);

        let delhi = collector.store().for_key("delhi");
        assert_eq!(1, delhi.len());
        assert!(delhi[0].error().map(|e| !e.is_empty()).unwrap_or(false));
        assert_eq!(None, delhi[0].temperature());
        assert_eq!(fixed_now(), delhi[0].captured_at);
    }

    #[tokio::test]
    async fn test_cycle_one_observation_per_city_when_all_fail() {
        let cities = ["california", "delhi", "kolkata", "london", "toronto"];
        let collector = collector(FakeSource::default(), FakeStore::default(), &cities);

        let report = collector.run_cycle().await;
        assert_eq!(5, report.observations);
        assert_eq!(5, report.fetch_errors);
        assert_eq!(5, collector.store().len());
        for city in cities {
            assert_eq!(1, collector.store().for_key(city).len());
        }
    }

    #[tokio::test]
    async fn test_cycle_processes_in_configured_order() {
        let cities = ["toronto", "delhi", "new york"];
        let collector = collector(FakeSource::default(), FakeStore::default(), &cities);

        collector.run_cycle().await;
        assert_eq!(vec!["toronto", "delhi", "new york"], *collector.source().calls.lock().unwrap());

        let keys: Vec<String> = collector
            .store()
            .written
            .lock()
            .unwrap()
            .iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(vec!["toronto", "delhi", "new_york"], keys);
    }

    #[tokio::test]
    async fn test_cycle_store_failure_does_not_stop_cycle() {
        let source = FakeSource::with(&[("london", 10.0, "rain"), ("delhi", 31.0, "haze")]);
        let store = FakeStore {
            fail_for: Some("london".to_owned()),
            ..Default::default()
        };
        let collector = collector(source, store, &["london", "delhi"]);

        let report = collector.run_cycle().await;
        assert_eq!(2, report.observations);
        assert_eq!(1, report.store_errors);
        assert!(collector.store().for_key("london").is_empty());
        assert_eq!(Some(31.0), collector.store().for_key("delhi")[0].temperature());
    }

    #[tokio::test]
    async fn test_guarded_cycle_catches_panic() {
        let source = FakeSource::default();
        source.panic_once.store(true, Ordering::SeqCst);
        let collector = collector(source, FakeStore::default(), &["london"]);

        let err = collector.guarded_cycle().await.unwrap_err();
        assert!(err.to_string().contains("upstream exploded"));

        let report = collector.guarded_cycle().await.unwrap();
        assert_eq!(1, report.observations);
    }

    #[tokio::test]
    async fn test_run_survives_failed_cycle_and_stops_on_signal() {
        let source = FakeSource::with(&[("london", 15.2, "cloudy")]);
        source.panic_once.store(true, Ordering::SeqCst);
        let collector = collector(source, FakeStore::default(), &["london", "delhi"]);
        let (tx, rx) = watch::channel(());

        let stop = async {
            while collector.store().len() < 4 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            tx.send(()).unwrap();
        };

        tokio::time::timeout(Duration::from_secs(10), async { tokio::join!(collector.run(rx), stop) })
            .await
            .expect("collector did not stop");

        // The first cycle panicked before writing anything, later cycles each
        // wrote one observation per city.
        let london = collector.store().for_key("london");
        let delhi = collector.store().for_key("delhi");
        assert!(london.len() >= 2);
        assert_eq!(london.len(), delhi.len());
        assert!(london.iter().all(|o| o.is_success()));
        assert!(delhi.iter().all(|o| !o.is_success()));
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let collector = collector(FakeSource::default(), FakeStore::default(), &["london"]);
        let (tx, rx) = watch::channel(());
        drop(tx);

        tokio::time::timeout(Duration::from_secs(10), collector.run(rx))
            .await
            .expect("collector did not stop");
        assert_eq!(1, collector.store().len());
    }
}
