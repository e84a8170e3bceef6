// src/services/tools.rs
//! Tools the assistant can call: weather, stock quotes and the next F1 race
//!
//! Tool failures never surface as errors. Each tool answers with a value the
//! model (or the client) can show to the user.

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::common::config::ToolKeys;

pub const WEATHER_TOOL: &str = "getWeather";
pub const STOCK_TOOL: &str = "getStockPrice";
pub const F1_TOOL: &str = "getF1Matches";

const WEATHER_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
const STOCK_URL: &str = "https://eodhd.com/api/real-time";
const F1_NEXT_RACE_URL: &str = "https://api.jolpi.ca/ergast/f1/current/next.json";

const MISSING_CITY: &str = "⚠️ I need a valid city name to provide weather info. Please specify one.";
const MISSING_SYMBOL: &str = "⚠️ I need a valid symbol to provide stock info. Please specify one.";

/// OpenAI-style function definitions advertised to the model
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": WEATHER_TOOL,
                "description": "Get the current weather for a specific city.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "location": {
                            "type": "string",
                            "description": "The name of the city, e.g., Bengaluru, London, or New York"
                        }
                    },
                    "required": ["location"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": STOCK_TOOL,
                "description": "Get the real-time stock price for a ticker symbol.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "symbol": {
                            "type": "string",
                            "description": "The stock ticker symbol, e.g. AAPL, TSLA"
                        }
                    },
                    "required": ["symbol"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": F1_TOOL,
                "description": "Get information about the next upcoming Formula 1 race.",
                "parameters": {
                    "type": "object",
                    "properties": {}
                }
            }
        }),
    ]
}

/// Reads a string argument, treating blanks as missing
fn string_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(error = %e, "Tool arguments were not valid JSON");
        json!({})
    })
}

fn city_not_found(location: &str) -> Value {
    Value::String(format!(
        "I'm sorry, I couldn't find a city named \"{}\". Please check the spelling and try again.",
        location
    ))
}

fn weather_failed(location: &str) -> Value {
    Value::String(format!(
        "I encountered an error while trying to get the weather for {}. Please try again later.",
        location
    ))
}

/// Maps a quote payload to itself, or to an error when the ticker is unknown
pub fn stock_quote_or_error(symbol: &str, body: Value) -> Value {
    let missing = match &body {
        Value::Null => true,
        Value::Object(map) => {
            map.is_empty() || map.get("code").and_then(Value::as_str) == Some("404")
        }
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    };

    if missing {
        json!({ "error": format!("Ticker {} not found.", symbol) })
    } else {
        body
    }
}

/// Picks the next race out of an Ergast-style schedule payload
pub fn next_race_or_error(body: &Value) -> Value {
    let Some(races) = body
        .pointer("/MRData/RaceTable/Races")
        .and_then(Value::as_array)
    else {
        return json!({ "error": "Failed to fetch F1 schedule." });
    };

    match races.first() {
        Some(race) => race.clone(),
        None => json!({ "error": "No upcoming races found." }),
    }
}

pub struct ToolService {
    client: Client,
    keys: ToolKeys,
}

impl ToolService {
    pub fn new(client: Client, keys: ToolKeys) -> Self {
        Self { client, keys }
    }

    pub fn definitions(&self) -> Vec<Value> {
        tool_definitions()
    }

    /// Runs a tool by name with the model-supplied JSON arguments
    pub async fn execute(&self, name: &str, raw_arguments: &str) -> Value {
        let args = parse_arguments(raw_arguments);
        info!(tool = %name, "🛠️ Executing tool");

        match name {
            WEATHER_TOOL => match string_arg(&args, "location") {
                Some(location) => self.weather(&location).await,
                None => Value::String(MISSING_CITY.to_string()),
            },
            STOCK_TOOL => match string_arg(&args, "symbol") {
                Some(symbol) => self.stock_price(&symbol).await,
                None => Value::String(MISSING_SYMBOL.to_string()),
            },
            F1_TOOL => self.next_f1_race().await,
            other => {
                warn!(tool = %other, "Model requested an unknown tool");
                json!({ "error": format!("Unknown tool: {}", other) })
            }
        }
    }

    async fn weather(&self, location: &str) -> Value {
        let response = self
            .client
            .get(WEATHER_URL)
            .query(&[
                ("q", location),
                ("units", "metric"),
                ("appid", self.keys.openweather_api_key.as_str()),
            ])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, location = %location, "Weather request failed");
                return weather_failed(location);
            }
        };

        match response.status() {
            StatusCode::NOT_FOUND => city_not_found(location),
            status if status.is_success() => match response.json::<Value>().await {
                Ok(body) => body,
                Err(e) => {
                    error!(error = %e, "Weather response was not valid JSON");
                    weather_failed(location)
                }
            },
            status => {
                error!(status = %status, location = %location, "Weather API returned an error");
                weather_failed(location)
            }
        }
    }

    async fn stock_price(&self, symbol: &str) -> Value {
        let url = format!("{}/{}", STOCK_URL, urlencoding::encode(symbol));
        let failed = || json!({ "error": "Failed to fetch stock data." });

        let response = match self
            .client
            .get(&url)
            .query(&[
                ("api_token", self.keys.eodhd_api_token.as_str()),
                ("fmt", "json"),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, symbol = %symbol, "Stock request failed");
                return failed();
            }
        };

        if !response.status().is_success() {
            error!(status = %response.status(), symbol = %symbol, "Stock API returned an error");
            return failed();
        }

        match response.json::<Value>().await {
            Ok(body) => stock_quote_or_error(symbol, body),
            Err(e) => {
                error!(error = %e, "Stock response was not valid JSON");
                failed()
            }
        }
    }

    async fn next_f1_race(&self) -> Value {
        let failed = || json!({ "error": "Failed to fetch F1 schedule." });

        let response = match self.client.get(F1_NEXT_RACE_URL).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                error!(status = %r.status(), "F1 schedule API returned an error");
                return failed();
            }
            Err(e) => {
                error!(error = %e, "F1 schedule request failed");
                return failed();
            }
        };

        match response.json::<Value>().await {
            Ok(body) => next_race_or_error(&body),
            Err(e) => {
                error!(error = %e, "F1 schedule response was not valid JSON");
                failed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ToolService {
        ToolService::new(
            Client::new(),
            ToolKeys {
                openweather_api_key: "weather-key".to_string(),
                eodhd_api_token: "stock-token".to_string(),
            },
        )
    }

    #[test]
    fn test_definitions_cover_all_tools() {
        let defs = tool_definitions();
        let names: Vec<&str> = defs
            .iter()
            .filter_map(|d| d.pointer("/function/name").and_then(Value::as_str))
            .collect();
        assert_eq!(names, vec![WEATHER_TOOL, STOCK_TOOL, F1_TOOL]);
        assert_eq!(defs[0]["function"]["parameters"]["required"][0], "location");
        assert_eq!(defs[1]["function"]["parameters"]["required"][0], "symbol");
    }

    #[tokio::test]
    async fn test_blank_arguments_short_circuit() {
        let tools = service();

        let weather = tools.execute(WEATHER_TOOL, r#"{"location":"   "}"#).await;
        assert_eq!(weather, Value::String(MISSING_CITY.to_string()));

        let stock = tools.execute(STOCK_TOOL, "").await;
        assert_eq!(stock, Value::String(MISSING_SYMBOL.to_string()));

        let garbage = tools.execute(STOCK_TOOL, "{not json").await;
        assert_eq!(garbage, Value::String(MISSING_SYMBOL.to_string()));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let out = service().execute("getHoroscope", "{}").await;
        assert_eq!(out["error"], "Unknown tool: getHoroscope");
    }

    #[test]
    fn test_stock_quote_or_error() {
        let quote = json!({ "code": "AAPL.US", "close": 189.5 });
        assert_eq!(stock_quote_or_error("AAPL", quote.clone()), quote);

        let not_found = stock_quote_or_error("ZZZZ", json!({ "code": "404" }));
        assert_eq!(not_found["error"], "Ticker ZZZZ not found.");
        assert_eq!(
            stock_quote_or_error("ZZZZ", Value::Null)["error"],
            "Ticker ZZZZ not found."
        );
    }

    #[test]
    fn test_next_race_or_error() {
        let schedule = json!({
            "MRData": { "RaceTable": { "Races": [
                { "raceName": "Abu Dhabi Grand Prix", "round": "24" }
            ]}}
        });
        assert_eq!(
            next_race_or_error(&schedule)["raceName"],
            "Abu Dhabi Grand Prix"
        );

        let empty = json!({ "MRData": { "RaceTable": { "Races": [] } } });
        assert_eq!(next_race_or_error(&empty)["error"], "No upcoming races found.");

        assert_eq!(
            next_race_or_error(&json!({ "unexpected": true }))["error"],
            "Failed to fetch F1 schedule."
        );
    }

    #[test]
    fn test_not_found_messages() {
        assert_eq!(
            city_not_found("Atlantis"),
            Value::String(
                "I'm sorry, I couldn't find a city named \"Atlantis\". Please check the spelling and try again."
                    .to_string()
            )
        );
    }
}
