//! Current-weather lookups against the OpenWeatherMap API.
//!
//! [`OpenWeatherClient`] turns a city name into a [`WeatherReport`]. Every
//! problem (unknown city, transport error, unexpected body) comes back as a
//! [`WeatherFailure`] value so the dispatcher can log it and apologise.
//! Requests are made once; there is no retry or caching.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{AssistantError, WeatherFailure};

pub const DEFAULT_WEATHER_API_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub city: String,
    pub description: String,
    pub temperature: f64,
}

impl WeatherReport {
    /// The spoken form of the report, e.g. "It is currently clear sky, 18° in Paris".
    pub fn sentence(&self) -> String {
        format!(
            "It is currently {}, {}° in {}",
            self.description,
            whole_degrees(self.temperature),
            self.city
        )
    }
}

fn whole_degrees(temperature: f64) -> i64 {
    // `as` saturates, and -0.4 rounds to -0.0 which becomes plain 0.
    temperature.round() as i64
}

#[async_trait]
pub trait WeatherService: Send + Sync {
    async fn fetch(&self, city: &str) -> Result<WeatherReport, WeatherFailure>;
}

/// Temperature unit system understood by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Units {
    #[default]
    Metric,
    Imperial,
    Standard,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
            Units::Standard => "standard",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Units {
    type Err = AssistantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            "standard" => Ok(Units::Standard),
            other => Err(AssistantError::InvalidConfiguration(format!(
                "WEATHER_UNITS must be metric, imperial or standard, got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    #[serde(default)]
    name: Option<String>,
    weather: Vec<Condition>,
    main: Readings,
}

#[derive(Debug, Deserialize)]
struct Condition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct Readings {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct ProviderMessage {
    #[serde(default)]
    message: Option<String>,
}

pub struct OpenWeatherClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    units: Units,
}

impl OpenWeatherClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, units: Units) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            units,
        }
    }
}

#[async_trait]
impl WeatherService for OpenWeatherClient {
    async fn fetch(&self, city: &str) -> Result<WeatherReport, WeatherFailure> {
        let city = city.trim();
        if city.is_empty() {
            return Err(WeatherFailure::UnknownCity(String::new()));
        }
        log::debug!("Requesting {} weather for '{}'", self.units, city);

        // `query` percent-encodes the city so names with spaces or accents
        // are safe in the URL.
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("q", city),
                ("appid", self.api_key.as_str()),
                ("units", self.units.as_str()),
            ])
            .send()
            .await
            // The request URL carries the API key; keep it out of the logs.
            .map_err(|e| WeatherFailure::Network(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WeatherFailure::Network(e.without_url().to_string()))?;

        if status == StatusCode::NOT_FOUND {
            return Err(WeatherFailure::UnknownCity(city.to_string()));
        }
        if !status.is_success() {
            let message = serde_json::from_str::<ProviderMessage>(&body)
                .ok()
                .and_then(|m| m.message)
                .unwrap_or_else(|| body.trim().to_string());
            return Err(WeatherFailure::Provider {
                status: status.as_u16(),
                message,
            });
        }
        parse_report(city, &body)
    }
}

/// Map a successful provider body to a report. The provider's resolved
/// city name is preferred over the one we asked for.
fn parse_report(requested_city: &str, body: &str) -> Result<WeatherReport, WeatherFailure> {
    let current: CurrentWeather =
        serde_json::from_str(body).map_err(|e| WeatherFailure::Parse(e.to_string()))?;
    let description = current
        .weather
        .into_iter()
        .next()
        .map(|c| c.description)
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| WeatherFailure::Parse("response has no weather description".into()))?;
    let city = current
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| requested_city.to_string());
    Ok(WeatherReport {
        city,
        description,
        temperature: current.main.temp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve exactly one canned HTTP response on a local port and hand the
    /// raw request back through the returned receiver.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf[..n]).to_string());
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        (format!("http://{addr}/data/2.5/weather"), rx)
    }

    const PARIS_BODY: &str = r#"{"weather":[{"id":800,"main":"Clear","description":"clear sky"}],"main":{"temp":18.2,"humidity":40},"name":"Paris","cod":200}"#;

    #[tokio::test]
    async fn fetch_parses_a_successful_response() {
        let (url, request) = serve_once("200 OK", PARIS_BODY).await;
        let client = OpenWeatherClient::new(url, "secret-key", Units::Metric);

        let report = client.fetch("paris").await.unwrap();
        assert_eq!(
            report,
            WeatherReport {
                city: "Paris".into(),
                description: "clear sky".into(),
                temperature: 18.2,
            }
        );

        let request = request.await.unwrap();
        let request_line = request.lines().next().unwrap();
        assert!(request_line.starts_with("GET /data/2.5/weather?"));
        assert!(request_line.contains("q=paris"));
        assert!(request_line.contains("appid=secret-key"));
        assert!(request_line.contains("units=metric"));
    }

    #[tokio::test]
    async fn city_names_are_url_encoded() {
        let (url, request) = serve_once("200 OK", PARIS_BODY).await;
        let client = OpenWeatherClient::new(url, "k", Units::Imperial);
        client.fetch("São Paulo").await.unwrap();

        let request = request.await.unwrap();
        let request_line = request.lines().next().unwrap();
        assert!(request_line.contains("q=S%C3%A3o+Paulo"));
        assert!(request_line.contains("units=imperial"));
    }

    #[tokio::test]
    async fn unknown_city_is_a_failure_value() {
        let (url, _request) =
            serve_once("404 Not Found", r#"{"cod":"404","message":"city not found"}"#).await;
        let client = OpenWeatherClient::new(url, "k", Units::Metric);

        let result = client.fetch("Qwertyzxcvb").await;
        assert_eq!(result, Err(WeatherFailure::UnknownCity("Qwertyzxcvb".into())));
    }

    #[tokio::test]
    async fn provider_errors_carry_status_and_message() {
        let (url, _request) = serve_once(
            "401 Unauthorized",
            r#"{"cod":401,"message":"Invalid API key."}"#,
        )
        .await;
        let client = OpenWeatherClient::new(url, "wrong", Units::Metric);

        match client.fetch("Paris").await {
            Err(WeatherFailure::Provider { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid API key.");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_a_parse_failure() {
        let (url, _request) = serve_once("200 OK", r#"{"cod":200,"main":{}}"#).await;
        let client = OpenWeatherClient::new(url, "k", Units::Metric);
        assert!(matches!(
            client.fetch("Paris").await,
            Err(WeatherFailure::Parse(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_network_failure() {
        // Bind then drop to get a port nothing is listening on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = OpenWeatherClient::new(
            format!("http://127.0.0.1:{port}/weather"),
            "secret-key",
            Units::Metric,
        );
        match client.fetch("Paris").await {
            Err(WeatherFailure::Network(message)) => assert!(!message.contains("secret-key")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_city_fails_without_a_request() {
        let client = OpenWeatherClient::new("http://127.0.0.1:9/unused", "k", Units::Metric);
        assert_eq!(
            client.fetch("   ").await,
            Err(WeatherFailure::UnknownCity(String::new()))
        );
    }

    #[test]
    fn parse_report_falls_back_to_requested_city() {
        let body = r#"{"weather":[{"description":"light rain"}],"main":{"temp":7.6}}"#;
        let report = parse_report("Bergen", body).unwrap();
        assert_eq!(report.city, "Bergen");
        assert_eq!(report.description, "light rain");
    }

    #[test]
    fn parse_report_requires_a_description() {
        let body = r#"{"weather":[],"main":{"temp":7.6},"name":"Bergen"}"#;
        assert!(matches!(
            parse_report("Bergen", body),
            Err(WeatherFailure::Parse(_))
        ));
    }

    #[test]
    fn sentence_rounds_to_whole_degrees() {
        let report = WeatherReport {
            city: "Paris".into(),
            description: "clear sky".into(),
            temperature: 18.0,
        };
        assert_eq!(report.sentence(), "It is currently clear sky, 18° in Paris");

        let chilly = WeatherReport {
            temperature: -0.4,
            ..report.clone()
        };
        assert_eq!(chilly.sentence(), "It is currently clear sky, 0° in Paris");

        let warm = WeatherReport {
            temperature: 21.6,
            ..report
        };
        assert_eq!(warm.sentence(), "It is currently clear sky, 22° in Paris");
    }

    #[test]
    fn units_parse_case_insensitively() {
        assert_eq!("Metric".parse::<Units>().unwrap(), Units::Metric);
        assert_eq!(" imperial ".parse::<Units>().unwrap(), Units::Imperial);
        assert!("kelvin".parse::<Units>().is_err());
    }
}
