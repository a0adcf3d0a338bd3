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

use crate::observation::{EntityKey, Observation};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;

const OUTCOME_OK: &str = "ok";
const OUTCOME_ERROR: &str = "error";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CityLabels {
    city: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    city: String,
    outcome: String,
}

/// Holder for metrics updated by the collector as it runs.
///
/// All metrics are created and registered upon call to `CollectorMetrics::new()`. Metrics
/// all share the prefix "weather_" and per-city metrics have a "city" label set to the
/// storage key of the city (e.g. `{city="new_york"}`).
#[derive(Debug, Default)]
pub struct CollectorMetrics {
    temperature: Family<CityLabels, Gauge<f64, AtomicU64>>,
    observations: Family<OutcomeLabels, Counter>,
    store_errors: Family<CityLabels, Counter>,
    cycles: Counter,
    cycle_failures: Counter,
}

impl CollectorMetrics {
    /// Create a new `CollectorMetrics` and register each metric with the provided `Registry`.
    pub fn new(reg: &mut Registry) -> Self {
        let metrics = Self::default();

        reg.register(
            "weather_temperature_degrees",
            "Last temperature reported for a city, in the configured unit system",
            metrics.temperature.clone(),
        );
        reg.register(
            "weather_observations",
            "Observations recorded, by city and whether the fetch succeeded",
            metrics.observations.clone(),
        );
        reg.register(
            "weather_store_errors",
            "Observations that could not be written to a store",
            metrics.store_errors.clone(),
        );
        reg.register("weather_cycles", "Completed collection cycles", metrics.cycles.clone());
        reg.register(
            "weather_cycle_failures",
            "Collection cycles aborted by an unexpected failure",
            metrics.cycle_failures.clone(),
        );

        metrics
    }

    /// Count the observation and, if it carries a reading, update the city temperature.
    pub fn observation(&self, key: &EntityKey, obs: &Observation) {
        let outcome = if obs.is_success() { OUTCOME_OK } else { OUTCOME_ERROR };
        self.observations
            .get_or_create(&OutcomeLabels {
                city: key.to_string(),
                outcome: outcome.to_owned(),
            })
            .inc();

        if let Some(t) = obs.temperature() {
            self.temperature
                .get_or_create(&CityLabels { city: key.to_string() })
                .set(t);
        }
    }

    pub fn store_error(&self, key: &EntityKey) {
        self.store_errors
            .get_or_create(&CityLabels { city: key.to_string() })
            .inc();
    }

    pub fn cycle_completed(&self) {
        self.cycles.inc();
    }

    pub fn cycle_failed(&self) {
        self.cycle_failures.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Conditions;
    use chrono::Local;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn test_observation_metrics() {
        let mut registry = Registry::default();
        let metrics = CollectorMetrics::new(&mut registry);
        let key = EntityKey::normalize("new york");

        let ok = Observation::build(
            "new york",
            Ok(Conditions {
                temperature: 21.5,
                description: "clear sky".to_owned(),
            }),
            Local::now(),
        );
        metrics.observation(&key, &ok);
        metrics.store_error(&key);
        metrics.cycle_completed();

        let mut buf = String::new();
        encode(&mut buf, &registry).unwrap();

        assert!(buf.contains(r#"weather_temperature_degrees{city="new_york"} 21.5"#));
        assert!(buf.contains(r#"weather_observations_total{city="new_york",outcome="ok"} 1"#));
        assert!(buf.contains(r#"weather_store_errors_total{city="new_york"} 1"#));
        assert!(buf.contains("weather_cycles_total 1"));
        assert!(buf.contains("weather_cycle_failures_total 0"));
    }
}
