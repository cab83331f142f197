//! Calendar page download.

use crate::{parse_calendar, CalendarError};
use coursegraph_dsl::CourseCode;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::time::Duration;

pub const CALENDAR_BASE_URL: &str = "https://ucalendar.uwaterloo.ca";
/// Calendar year path segment, e.g. `2324` for 2023-2024.
pub const DEFAULT_CALENDAR_YEAR: &str = "2324";

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const TIMEOUT_SECS: u64 = 45;

pub struct CalendarClient {
    client: Client,
    base_url: String,
}

impl CalendarClient {
    pub fn new() -> Result<Self, CalendarError> {
        Self::with_base_url(CALENDAR_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, CalendarError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static(HTML_ACCEPT));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .map_err(|e| CalendarError::Fetch {
                url: base_url.to_string(),
                message: format!("failed to build http client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `{base}/{year}/COURSE/course-{DEPT}.html`
    pub fn page_url(&self, year: &str, dept: &str) -> String {
        format!(
            "{}/{}/COURSE/course-{}.html",
            self.base_url,
            year.trim(),
            dept.trim().to_uppercase()
        )
    }

    /// Download one department page. HTTP 404 is [`CalendarError::NotFound`]
    /// so batch runs can skip departments without a page.
    pub async fn fetch(&self, year: &str, dept: &str) -> Result<String, CalendarError> {
        let url = self.page_url(year, dept);
        let fetch_error = |message: String| CalendarError::Fetch {
            url: url.clone(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CalendarError::NotFound(url.clone()));
        }
        if !status.is_success() {
            return Err(fetch_error(format!("http status {status}")));
        }

        let body = response.text().await.map_err(|e| fetch_error(e.to_string()))?;
        tracing::debug!(url = %url, bytes = body.len(), "fetched calendar page");
        Ok(body)
    }

    /// [`Self::fetch`] followed by [`parse_calendar`].
    pub async fn fetch_courses(
        &self,
        year: &str,
        dept: &str,
    ) -> Result<BTreeMap<CourseCode, String>, CalendarError> {
        let html = self.fetch(year, dept).await?;
        parse_calendar(&html)
    }
}
