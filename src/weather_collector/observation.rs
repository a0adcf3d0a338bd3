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

use crate::client::{ClientError, Conditions};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error;
use std::fmt;

/// Result of one fetch attempt for one city.
///
/// Serializes to the document shape stored for each city, either
/// `{"city", "timestamp", "temperature", "description"}` or
/// `{"city", "timestamp", "error"}`. Because the outcome is a `Reading`
/// it is not possible to construct an observation with both a reading and
/// an error, or with neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub city: String,
    #[serde(rename = "timestamp")]
    pub captured_at: DateTime<Local>,
    #[serde(flatten)]
    pub reading: Reading,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    Conditions { temperature: f64, description: String },
    Failed { error: String },
}

impl Observation {
    /// Build the observation for `city` from the outcome of a fetch made at `now`.
    pub fn build(city: &str, result: Result<Conditions, ClientError>, now: DateTime<Local>) -> Self {
        let reading = match result {
            Ok(c) => Reading::Conditions {
                temperature: c.temperature,
                description: c.description,
            },
            Err(e) => Reading::Failed {
                error: format!("could not retrieve data: {}", e),
            },
        };

        Observation {
            city: city.to_owned(),
            captured_at: now,
            reading,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.reading, Reading::Conditions { .. })
    }

    pub fn temperature(&self) -> Option<f64> {
        match &self.reading {
            Reading::Conditions { temperature, .. } => Some(*temperature),
            Reading::Failed { .. } => None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match &self.reading {
            Reading::Conditions { description, .. } => Some(description),
            Reading::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.reading {
            Reading::Conditions { .. } => None,
            Reading::Failed { error } => Some(error),
        }
    }
}

/// Storage-safe name of the collection or rows holding a city's observations.
///
/// Every whitespace character of the city name is replaced by `_`. Applying
/// this to an already normalized name returns it unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn normalize(name: &str) -> Self {
        EntityKey(name.chars().map(|c| if c.is_whitespace() { '_' } else { c }).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityError {
    Empty,
    Blank,
    Collision(String, String),
}

impl fmt::Display for EntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "no cities configured"),
            Self::Blank => write!(f, "city names must not be blank"),
            Self::Collision(a, b) => write!(f, "cities '{}' and '{}' map to the same storage key", a, b),
        }
    }
}

impl error::Error for EntityError {}

/// Fixed, ordered set of cities to monitor.
///
/// Construction fails for an empty list, a blank name, or two names that
/// normalize to the same `EntityKey`. Iteration order is the configured order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySet {
    cities: Vec<(String, EntityKey)>,
}

impl EntitySet {
    pub fn new<I, S>(cities: I) -> Result<Self, EntityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen: HashMap<EntityKey, String> = HashMap::new();
        let mut out = Vec::new();

        for city in cities {
            let city = city.as_ref().trim();
            if city.is_empty() {
                return Err(EntityError::Blank);
            }

            let key = EntityKey::normalize(city);
            if let Some(existing) = seen.get(&key) {
                return Err(EntityError::Collision(existing.clone(), city.to_owned()));
            }

            seen.insert(key.clone(), city.to_owned());
            out.push((city.to_owned(), key));
        }

        if out.is_empty() {
            return Err(EntityError::Empty);
        }

        Ok(EntitySet { cities: out })
    }

    /// City names paired with their storage keys, in configured order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EntityKey)> {
        self.cities.iter().map(|(c, k)| (c.as_str(), k))
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::{StatusCode, Url};

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn not_found() -> ClientError {
        ClientError::Unexpected(
            StatusCode::NOT_FOUND,
            Url::parse("https://api.openweathermap.org/data/2.5/weather").unwrap(),
        )
    }

    #[test]
    fn test_build_success() {
        let conditions = Conditions {
            temperature: 15.2,
            description: "cloudy".to_owned(),
        };
        let obs = Observation::build("london", Ok(conditions), fixed_now());

        assert_eq!("london", obs.city);
        assert_eq!(fixed_now(), obs.captured_at);
        assert_eq!(Some(15.2), obs.temperature());
        assert_eq!(Some("cloudy"), obs.description());
        assert_eq!(None, obs.error());
        assert!(obs.is_success());
    }

    #[test]
    fn test_build_failure() {
        let obs = Observation::build("delhi", Err(not_found()), fixed_now());

        assert_eq!(fixed_now(), obs.captured_at);
        assert_eq!(None, obs.temperature());
        assert_eq!(None, obs.description());
        assert!(obs.error().map(|e| !e.is_empty()).unwrap_or(false));
        assert!(!obs.is_success());
    }

    #[test]
    fn test_success_document_has_no_error_field() {
        let conditions = Conditions {
            temperature: -3.5,
            description: "light snow".to_owned(),
        };
        let obs = Observation::build("toronto", Ok(conditions), fixed_now());
        let doc = serde_json::to_value(&obs).unwrap();

        assert_eq!(-3.5, doc["temperature"]);
        assert_eq!("light snow", doc["description"]);
        assert!(doc.get("timestamp").is_some());
        assert!(doc.get("error").is_none());
    }

    #[test]
    fn test_failure_document_has_only_error() {
        let obs = Observation::build("delhi", Err(not_found()), fixed_now());
        let doc = serde_json::to_value(&obs).unwrap();

        assert!(doc["error"].as_str().unwrap().contains("404"));
        assert!(doc.get("temperature").is_none());
        assert!(doc.get("description").is_none());
    }

    #[test]
    fn test_failure_document_parses_back_as_failure() {
        let obs = Observation::build("delhi", Err(not_found()), fixed_now());
        let json = serde_json::to_string(&obs).unwrap();
        let parsed: Observation = serde_json::from_str(&json).unwrap();

        assert_eq!(obs, parsed);
    }

    #[test]
    fn test_normalize_replaces_whitespace() {
        assert_eq!("new_york", EntityKey::normalize("new york").as_str());
        assert_eq!("rio_de_janeiro", EntityKey::normalize("rio de\tjaneiro").as_str());
        assert_eq!("london", EntityKey::normalize("london").as_str());
    }

    #[test]
    fn test_normalize_idempotent() {
        for name in ["new york", "san  francisco", "london", "a\tb\nc", "already_safe"] {
            let once = EntityKey::normalize(name);
            let twice = EntityKey::normalize(once.as_str());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_entity_set_keeps_order() {
        let set = EntitySet::new(["london", "delhi", "new york"]).unwrap();
        let names: Vec<&str> = set.iter().map(|(c, _)| c).collect();

        assert_eq!(vec!["london", "delhi", "new york"], names);
        assert_eq!(3, set.len());
    }

    #[test]
    fn test_entity_set_collision() {
        let err = EntitySet::new(["new york", "new_york"]).unwrap_err();
        assert_eq!(EntityError::Collision("new york".to_owned(), "new_york".to_owned()), err);
    }

    #[test]
    fn test_entity_set_duplicate() {
        assert!(EntitySet::new(["london", " london "]).is_err());
    }

    #[test]
    fn test_entity_set_invalid() {
        assert_eq!(EntityError::Empty, EntitySet::new(Vec::<String>::new()).unwrap_err());
        assert_eq!(EntityError::Blank, EntitySet::new(["london", "  "]).unwrap_err());
    }
}
