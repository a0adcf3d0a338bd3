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

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::error;
use std::fmt;
use std::str::FromStr;

/// Reason a current-weather request could not produce a reading.
#[derive(Debug)]
pub enum ClientError {
    Internal(reqwest::Error),
    Unexpected(StatusCode, Url),
    Malformed(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
            Self::Malformed(reason) => write!(f, "malformed response: {}", reason),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            _ => None,
        }
    }
}

/// Unit system requested from the upstream API. Temperatures are stored exactly
/// as reported, so the unit chosen here is the unit of every stored reading:
/// kelvin for `Standard`, celsius for `Metric`, fahrenheit for `Imperial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Units {
    Standard,
    #[default]
    Metric,
    Imperial,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Standard => "standard",
            Units::Metric => "metric",
            Units::Imperial => "imperial",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(Units::Standard),
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            _ => Err(format!(
                "unknown unit system '{}', expected one of: standard, metric, imperial",
                s
            )),
        }
    }
}

/// Temperature and condition summary for a single city at fetch time.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditions {
    pub temperature: f64,
    pub description: String,
}

/// Source of current weather conditions by city name.
///
/// Implementations never panic or retry: every failure is returned as a
/// `ClientError` so that callers can record it and move on.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self, city: &str) -> Result<Conditions, ClientError>;
}

/// Client for the OpenWeather current-weather-by-name endpoint.
#[derive(Debug)]
pub struct OpenWeatherClient {
    client: Client,
    base_url: Url,
    api_key: String,
    units: Units,
}

impl OpenWeatherClient {
    const USER_AGENT: &'static str = concat!("weather_collector/", env!("CARGO_PKG_VERSION"));
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new(client: Client, base_url: Url, api_key: String, units: Units) -> Self {
        OpenWeatherClient {
            client,
            base_url,
            api_key,
            units,
        }
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn fetch(&self, city: &str) -> Result<Conditions, ClientError> {
        // The API key is a query parameter: `url` here never carries it, and
        // reqwest errors have their URL stripped before being returned.
        let url = self.base_url.clone();
        tracing::debug!(message = "making current weather request", url = %url, city = %city);

        let res = self
            .client
            .get(url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .query(&[
                ("q", city),
                ("appid", self.api_key.as_str()),
                ("units", self.units.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ClientError::Internal(e.without_url()))?;

        let status = res.status();
        if status != StatusCode::OK {
            return Err(ClientError::Unexpected(status, url));
        }

        let body = res.text().await.map_err(|e| ClientError::Internal(e.without_url()))?;
        let parsed: CurrentWeather =
            serde_json::from_str(&body).map_err(|e| ClientError::Malformed(e.to_string()))?;

        parsed.into_conditions()
    }
}

#[derive(Deserialize, Debug)]
struct CurrentWeather {
    main: Main,
    weather: Vec<Condition>,
}

#[derive(Deserialize, Debug)]
struct Main {
    temp: f64,
}

#[derive(Deserialize, Debug)]
struct Condition {
    description: String,
}

impl CurrentWeather {
    fn into_conditions(self) -> Result<Conditions, ClientError> {
        let description = self
            .weather
            .into_iter()
            .next()
            .map(|c| c.description)
            .ok_or_else(|| ClientError::Malformed("no weather conditions in response".to_owned()))?;

        Ok(Conditions {
            temperature: self.main.temp,
            description,
        })
    }
}
