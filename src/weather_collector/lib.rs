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

//! Periodic collector of OpenWeather observations
//!
//! ## Features
//!
//! `weather_collector` fetches current weather for a fixed list of cities from the
//! [OpenWeather current weather API] on a fixed interval and appends one observation
//! per city per cycle to a document store, and optionally to a relational `weather`
//! table. Each observation is one of:
//!
//! * `{"city", "timestamp", "temperature", "description"}` - The fetch succeeded.
//! * `{"city", "timestamp", "error"}` - The fetch failed for any reason.
//!
//! Observations are never updated or removed. Each city has its own collection named
//! after the city with whitespace replaced by underscores (e.g. `new_york`).
//!
//! The following metrics are emitted at `/metrics`.
//!
//! * `weather_temperature_degrees{city=$CITY}` - Last temperature reported for a city.
//! * `weather_observations_total{city=$CITY, outcome=$OUTCOME}` - Observations recorded,
//!   `outcome` is `ok` or `error`.
//! * `weather_store_errors_total{city=$CITY}` - Observations that could not be stored.
//! * `weather_cycles_total` - Completed collection cycles.
//! * `weather_cycle_failures_total` - Cycles aborted by an unexpected failure.
//!
//! [OpenWeather current weather API]: https://openweathermap.org/current
//!
//! ## Build
//!
//! ```text
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Collect
//!
//! An OpenWeather API key is required. Everything else has a default.
//!
//! ```text
//! export OPENWEATHER_API_KEY=...
//! ./weather_collector --cities 'london,delhi,new york' --relational-db weather.db
//! ```
//!
//! Every flag may also be given as an environment variable, see `--help`. The
//! collector runs until it receives SIGINT or SIGTERM, finishing the cycle in
//! progress first.
//!
//! ### Query
//!
//! Stored observations are available over HTTP on port `9783`:
//!
//! ```text
//! curl -sS http://localhost:9783/cities
//! curl -sS 'http://localhost:9783/cities/london/observations?limit=5'
//! ```
//!
//! Or directly from the databases with `weather_report`:
//!
//! ```text
//! ./weather_report history london --limit 5
//! ./weather_report --relational-db weather.db recent
//! ```
//!

pub mod client;
pub mod collector;
pub mod http;
pub mod metrics;
pub mod observation;
pub mod store;
