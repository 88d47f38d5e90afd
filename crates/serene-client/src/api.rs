//! REST collaborator for the chat endpoints.

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use serene_shared::{ApiEnvelope, ChannelId, ChatMessage, EnvelopeError, UserId};
use serene_store::Channel;

use crate::error::ApiError;

/// A user that can be added to channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    pub id: UserId,
    #[serde(default, alias = "fullName", alias = "userName")]
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateChannelRequest<'a> {
    name: &'a str,
    creator_id: &'a UserId,
    member_ids: &'a [UserId],
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, api_url: &str) -> Result<Self, ApiError> {
        let base = Url::parse(api_url).map_err(|e| ApiError::InvalidUrl(format!("{api_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(api_url.to_string()));
        }
        Ok(Self { http, base })
    }

    /// `GET /api/Chat/channels?userId=`
    pub async fn fetch_channels(&self, user_id: &UserId) -> Result<Vec<Channel>, ApiError> {
        let mut url = self.endpoint(&["api", "Chat", "channels"])?;
        url.query_pairs_mut().append_pair("userId", user_id.as_str());
        debug!(url = %url, "Fetching channels");
        read_envelope(self.http.get(url).send().await?).await
    }

    /// `GET /api/Chat/users`
    pub async fn fetch_users(&self) -> Result<Vec<ChatUser>, ApiError> {
        let url = self.endpoint(&["api", "Chat", "users"])?;
        debug!(url = %url, "Fetching users");
        read_envelope(self.http.get(url).send().await?).await
    }

    /// `POST /api/Chat/channels`
    pub async fn create_channel(
        &self,
        name: &str,
        creator_id: &UserId,
        member_ids: &[UserId],
    ) -> Result<Channel, ApiError> {
        let url = self.endpoint(&["api", "Chat", "channels"])?;
        let body = CreateChannelRequest {
            name,
            creator_id,
            member_ids,
        };
        debug!(url = %url, channel = name, "Creating channel");
        read_envelope(self.http.post(url).json(&body).send().await?).await
    }

    /// `GET /api/Chat/channels/{id}/messages`
    pub async fn fetch_messages(&self, channel_id: &ChannelId) -> Result<Vec<ChatMessage>, ApiError> {
        let url = self.endpoint(&["api", "Chat", "channels", channel_id.as_str(), "messages"])?;
        debug!(url = %url, "Fetching channel history");
        read_envelope(self.http.get(url).send().await?).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Unwrap the `{ success, result }` envelope. A non-2xx response carrying an
/// envelope message is reported with that message.
async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        if let Ok(envelope) = serde_json::from_str::<ApiEnvelope<Value>>(&body) {
            if let Some(message) = envelope.message() {
                return Err(EnvelopeError::Rejected(message.to_string()).into());
            }
        }
        return Err(ApiError::Status(status.as_u16()));
    }

    let envelope: ApiEnvelope<T> = serde_json::from_str(&body)?;
    Ok(envelope.into_data()?)
}
