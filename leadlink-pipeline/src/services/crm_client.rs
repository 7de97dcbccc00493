//! CRM API client
//!
//! Pages the CRM's `people` endpoint and resolves its users. Auth is HTTP
//! Basic with the API key as username and an empty password. Responses
//! carry `_metadata{offset,limit,total}`; a collection array keyed by the
//! resource name holds the records.

use base64::Engine;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Records requested per page.
pub const PAGE_SIZE: i64 = 100;

/// CRM client errors
#[derive(Debug, Error)]
pub enum CrmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid credentials")]
    Unauthorized,

    #[error("Rate limited")]
    RateLimited,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<CrmError> for leadlink_common::Error {
    fn from(e: CrmError) -> Self {
        match e {
            CrmError::Unauthorized => {
                leadlink_common::Error::InvalidInput("Invalid CRM credentials".to_string())
            }
            other => leadlink_common::Error::Internal(other.to_string()),
        }
    }
}

/// Page envelope metadata
#[derive(Debug, Clone, Deserialize)]
pub struct PageMetadata {
    pub offset: i64,
    #[allow(dead_code)]
    pub limit: i64,
    pub total: i64,
}

/// One page of people
#[derive(Debug, Deserialize)]
pub struct PeoplePage {
    #[serde(rename = "_metadata")]
    pub metadata: PageMetadata,
    #[serde(default)]
    pub people: Vec<CrmPerson>,
}

#[derive(Debug, Deserialize)]
struct UsersPage {
    #[serde(rename = "_metadata")]
    metadata: PageMetadata,
    #[serde(default)]
    users: Vec<CrmUser>,
}

/// One CRM person as returned by the API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmPerson {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub emails: Vec<CrmEmail>,
    #[serde(default)]
    pub phones: Vec<CrmPhone>,
    #[serde(default)]
    pub addresses: Vec<CrmAddress>,
    #[serde(default)]
    pub assigned_user_id: Option<i64>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrmEmail {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrmPhone {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrmAddress {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// One CRM user (for assigned-agent resolution)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrmUser {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// CRM API client
pub struct CrmClient {
    http_client: reqwest::Client,
    base_url: String,
    auth_header: String,
}

impl CrmClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, CrmError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CrmError::Network(e.to_string()))?;

        // Basic auth: api key as username, empty password
        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("{}:", api_key));

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Basic {}", credentials),
        })
    }

    /// Low-cost credential check against the identity endpoint.
    pub async fn verify_credentials(&self) -> Result<(), CrmError> {
        let url = format!("{}/identity", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .map_err(|e| CrmError::Network(e.to_string()))?;

        match response.status().as_u16() {
            200 => Ok(()),
            401 | 403 => Err(CrmError::Unauthorized),
            429 => Err(CrmError::RateLimited),
            status => Err(CrmError::Api(
                status,
                response.text().await.unwrap_or_default(),
            )),
        }
    }

    /// Fetch all CRM users, paging until exhausted.
    pub async fn fetch_users(&self) -> Result<Vec<CrmUser>, CrmError> {
        let mut users = Vec::new();
        let mut offset: i64 = 0;

        loop {
            let url = format!("{}/users", self.base_url);
            let page: UsersPage = self
                .get_json(
                    &url,
                    &[("offset", offset.to_string()), ("limit", PAGE_SIZE.to_string())],
                )
                .await?;

            let returned = page.users.len() as i64;
            users.extend(page.users);

            if page.metadata.offset + returned >= page.metadata.total || returned == 0 {
                break;
            }
            offset = page.metadata.offset + returned;
        }

        Ok(users)
    }

    /// Fetch one page of people, optionally filtered to records updated
    /// after the given instant.
    pub async fn fetch_people_page(
        &self,
        offset: i64,
        updated_after: Option<&str>,
    ) -> Result<PeoplePage, CrmError> {
        let url = format!("{}/people", self.base_url);
        let mut params = vec![
            ("offset", offset.to_string()),
            ("limit", PAGE_SIZE.to_string()),
        ];
        if let Some(after) = updated_after {
            params.push(("updatedAfter", after.to_string()));
        }

        self.get_json(&url, &params).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, CrmError> {
        tracing::debug!(url = %url, "CRM request");

        let response = self
            .http_client
            .get(url)
            .query(params)
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .map_err(|e| CrmError::Network(e.to_string()))?;

        let status = response.status();
        match status.as_u16() {
            200 => {}
            401 | 403 => return Err(CrmError::Unauthorized),
            429 => return Err(CrmError::RateLimited),
            code => {
                return Err(CrmError::Api(
                    code,
                    response.text().await.unwrap_or_default(),
                ))
            }
        }

        response
            .json::<T>()
            .await
            .map_err(|e| CrmError::Parse(e.to_string()))
    }
}

/// Whether another page follows the one just fetched.
pub fn has_more_pages(metadata: &PageMetadata, returned: i64) -> bool {
    returned > 0 && metadata.offset + returned < metadata.total
}
