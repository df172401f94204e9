use std::time::Duration;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, Utc};
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::{DashError, Result};

const AUTH_BASE_URL: &str = "https://login.microsoftonline.com";
const GRAPH_BASE_URL: &str = "https://graph.microsoft.com";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const REQUEST_TIMEOUT_SECONDS: u64 = 15;

/// Days of lookahead for the upcoming-meetings window.
const LOOKAHEAD_DAYS: u64 = 6;

/// Recurring stand-up filtered out of the listing.
const IGNORED_SUBJECT: &str = "Daily Sprint";

const DAY_NAMES: [&str; 7] = [
    "Lundi", "Mardi", "Mercredi", "Jeudi", "Vendredi", "Samedi", "Dimanche",
];

#[derive(Debug, Clone)]
pub struct O365Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct CalendarViewResponse {
    value: Vec<MeetingEvent>,
}

/// A calendar event from the Graph calendar-view query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingEvent {
    pub subject: String,
    #[serde(default)]
    pub is_cancelled: bool,
    pub start: EventMoment,
    pub end: EventMoment,
    #[serde(default)]
    pub locations: Vec<EventLocation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMoment {
    pub date_time: String,
}

impl EventMoment {
    fn parse(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.date_time, "%Y-%m-%dT%H:%M:%S%.f").ok()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLocation {
    pub display_name: String,
}

/// Lists the upcoming calendar meetings via the Microsoft Graph API.
///
/// Authenticates with client credentials on each query; tokens are not
/// persisted anywhere.
pub struct MeetingReminder {
    client: Client,
    token_url: Url,
    calendar_url: Url,
    credentials: O365Credentials,
}

impl MeetingReminder {
    pub fn new(credentials: O365Credentials) -> Result<Self> {
        Self::with_endpoints(credentials, AUTH_BASE_URL, GRAPH_BASE_URL)
    }

    /// Builds a reminder against explicit endpoints (used by tests).
    pub fn with_endpoints(
        credentials: O365Credentials,
        auth_base_url: &str,
        graph_base_url: &str,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent("pipedash/0.3.0")
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| DashError::Config(format!("Failed to create HTTP client: {e}")))?;

        let token_url = Url::parse(auth_base_url)
            .map_err(|e| DashError::Config(format!("Invalid auth base URL: {e}")))?
            .join(&format!("{}/oauth2/v2.0/token", credentials.tenant_id))
            .map_err(|e| DashError::Config(format!("Invalid token URL: {e}")))?;

        let calendar_url = Url::parse(graph_base_url)
            .map_err(|e| DashError::Config(format!("Invalid graph base URL: {e}")))?
            .join("v1.0/me/calendarView")
            .map_err(|e| DashError::Config(format!("Invalid calendar URL: {e}")))?;

        Ok(Self {
            client,
            token_url,
            calendar_url,
            credentials,
        })
    }

    /// Fetches the non-cancelled meetings of the next six days, already
    /// filtered and ready for formatting.
    pub async fn next_meetings(&self) -> Result<Vec<MeetingEvent>> {
        let token = self.acquire_token().await?;

        let now = Utc::now();
        let until = now + Days::new(LOOKAHEAD_DAYS);

        let response = self
            .client
            .get(self.calendar_url.clone())
            .bearer_auth(&token)
            .query(&[
                ("startDateTime", now.to_rfc3339()),
                ("endDateTime", until.to_rfc3339()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(DashError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let view: CalendarViewResponse = response.json().await?;
        debug!("Calendar view returned {} events", view.value.len());

        Ok(view.value.into_iter().filter(is_relevant).collect())
    }

    async fn acquire_token(&self) -> Result<String> {
        let response = self
            .client
            .post(self.token_url.clone())
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(DashError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}

fn is_relevant(event: &MeetingEvent) -> bool {
    !event.is_cancelled && !event.subject.contains(IGNORED_SUBJECT)
}

/// Renders one meeting as a dashboard line, or `None` for events spanning
/// several days (those are not displayed).
pub fn format_event(event: &MeetingEvent, today: NaiveDate) -> Option<String> {
    let start = event.start.parse()?;
    let end = event.end.parse()?;

    if start.date() != end.date() {
        return None;
    }

    let day = if start.date() == today {
        "Aujourd'hui".to_string()
    } else if Some(start.date()) == today.succ_opt() {
        "Demain".to_string()
    } else {
        let weekday = DAY_NAMES[start.date().weekday().num_days_from_monday() as usize];
        format!("{} {}", weekday, start.date().format("%d/%m"))
    };

    let locations: Vec<&str> = event
        .locations
        .iter()
        .map(|location| location.display_name.as_str())
        .collect();

    Some(format!(
        "{} {} à {} {}, {}",
        day,
        start.time().format("%H:%M"),
        end.time().format("%H:%M"),
        event.subject,
        locations.join(" "),
    ))
}
