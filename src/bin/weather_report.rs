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

use clap::{Parser, Subcommand};
use std::error::Error;
use std::process;
use tracing::Level;
use weather_collector::observation::{EntityKey, Observation};
use weather_collector::store::{DocumentStore, RelationalStore, StoreError};

const DEFAULT_LOG_LEVEL: Level = Level::WARN;

/// Print observations stored by weather_collector, one JSON document per line.
#[derive(Debug, Parser)]
#[clap(name = "weather_report", version = clap::crate_version!())]
struct WeatherReportApplication {
    /// Path of the SQLite database holding one document collection per city
    #[clap(long, env = "WEATHER_DOCUMENT_DB", default_value = DocumentStore::DEFAULT_PATH)]
    document_db: String,

    /// Path of the SQLite database holding the `weather` table
    #[clap(long, env = "WEATHER_RELATIONAL_DB")]
    relational_db: Option<String>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, env = "WEATHER_LOG_LEVEL", default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List cities that have stored observations
    Cities,

    /// Show stored observations for a city, oldest first
    History {
        /// City name, as configured for the collector
        city: String,

        /// Only show the most recent N observations
        #[clap(long)]
        limit: Option<usize>,
    },

    /// Show the most recent rows of the `weather` table, newest first
    Recent {
        #[clap(long, default_value_t = RelationalStore::DEFAULT_RECENT)]
        limit: usize,
    },
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = WeatherReportApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_writer(std::io::stderr)
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let res = match &opts.command {
        Command::Cities => open_documents(&opts.document_db)
            .and_then(|documents| documents.collections())
            .and_then(|names| {
                for name in names {
                    println!("{}", serde_json::to_string(&name)?);
                }
                Ok(())
            }),
        Command::History { city, limit } => {
            let key = EntityKey::normalize(city);
            open_documents(&opts.document_db)
                .and_then(|documents| match limit {
                    Some(n) => documents.latest(&key, *n).map(|mut obs| {
                        obs.reverse();
                        obs
                    }),
                    None => documents.history(&key),
                })
                .and_then(|obs| print_observations(&obs))
        }
        Command::Recent { limit } => {
            let path = opts.relational_db.as_deref().unwrap_or_else(|| {
                tracing::error!("--relational-db is required for 'recent'");
                process::exit(1)
            });

            tracing::debug!(message = "opening relational database", path = %path);
            RelationalStore::open_read_only(path)
                .and_then(|relational| relational.recent(*limit))
                .and_then(|obs| print_observations(&obs))
        }
    };

    if let Err(e) = res {
        tracing::error!(message = "unable to read observations", error = %e);
        process::exit(1);
    }

    Ok(())
}

fn open_documents(path: &str) -> Result<DocumentStore, StoreError> {
    tracing::debug!(message = "opening document database", path = %path);
    DocumentStore::open_read_only(path)
}

fn print_observations(obs: &[Observation]) -> Result<(), StoreError> {
    for o in obs {
        println!("{}", serde_json::to_string(o)?);
    }

    Ok(())
}
