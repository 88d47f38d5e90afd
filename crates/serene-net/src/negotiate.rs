//! Hub endpoint addressing and the SignalR negotiate step.

use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use serene_shared::constants::{MAX_NEGOTIATE_REDIRECTS, NEGOTIATE_VERSION};
use serene_shared::UserId;

use crate::error::{NetError, Result};

/// A hub URL, optionally scoped to a user through the `userId` query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubEndpoint {
    url: Url,
}

impl HubEndpoint {
    pub fn parse(hub_url: &str) -> Result<Self> {
        let url = Url::parse(hub_url).map_err(|e| NetError::InvalidUrl(format!("{hub_url}: {e}")))?;
        match url.scheme() {
            "http" | "https" | "ws" | "wss" => Ok(Self { url }),
            other => Err(NetError::InvalidUrl(format!("unsupported scheme {other}"))),
        }
    }

    /// The hub URL with `userId=<user_id>` appended.
    pub fn for_user(hub_url: &str, user_id: &UserId) -> Result<Self> {
        let mut endpoint = Self::parse(hub_url)?;
        endpoint
            .url
            .query_pairs_mut()
            .append_pair("userId", user_id.as_str());
        Ok(endpoint)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `<hub>/negotiate?<hub query>&negotiateVersion=1`, always over http(s).
    pub fn negotiate_url(&self) -> Result<Url> {
        let mut url = self.url.clone();
        let scheme = match url.scheme() {
            "ws" => Some("http"),
            "wss" => Some("https"),
            _ => None,
        };
        if let Some(scheme) = scheme {
            url.set_scheme(scheme)
                .map_err(|_| NetError::InvalidUrl(self.url.to_string()))?;
        }

        url.path_segments_mut()
            .map_err(|_| NetError::InvalidUrl(self.url.to_string()))?
            .pop_if_empty()
            .push("negotiate");
        url.query_pairs_mut()
            .append_pair("negotiateVersion", &NEGOTIATE_VERSION.to_string());
        Ok(url)
    }

    /// The websocket URL for this hub, carrying the negotiated connection
    /// token (`id`) and access token when present.
    pub fn websocket_url(&self, connection_token: Option<&str>, access_token: Option<&str>) -> Result<Url> {
        let mut url = self.url.clone();
        let scheme = match url.scheme() {
            "http" => Some("ws"),
            "https" => Some("wss"),
            _ => None,
        };
        if let Some(scheme) = scheme {
            url.set_scheme(scheme)
                .map_err(|_| NetError::InvalidUrl(self.url.to_string()))?;
        }

        if let Some(token) = connection_token {
            url.query_pairs_mut().append_pair("id", token);
        }
        if let Some(token) = access_token {
            url.query_pairs_mut().append_pair("access_token", token);
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    pub transport: String,
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

/// Body of a `/negotiate` response.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub connection_token: Option<String>,
    #[serde(default)]
    pub negotiate_version: u32,
    #[serde(default)]
    pub available_transports: Vec<AvailableTransport>,
    /// Redirect target (e.g. Azure SignalR Service).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl NegotiateResponse {
    pub fn supports_websockets(&self) -> bool {
        self.available_transports
            .iter()
            .any(|t| t.transport.eq_ignore_ascii_case("WebSockets"))
    }

    /// Token to present on the websocket: the connection token from
    /// negotiate v1 onwards, the connection id before that.
    pub fn connection_token(&self) -> Option<&str> {
        if self.negotiate_version >= 1 {
            self.connection_token.as_deref()
        } else {
            self.connection_id.as_deref()
        }
    }
}

/// Outcome of a successful negotiation.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub endpoint: HubEndpoint,
    pub connection_token: Option<String>,
    pub access_token: Option<String>,
}

impl Negotiated {
    pub fn websocket_url(&self) -> Result<Url> {
        self.endpoint
            .websocket_url(self.connection_token.as_deref(), self.access_token.as_deref())
    }
}

/// POST to the negotiate endpoint, following redirects.
pub async fn negotiate(http: &reqwest::Client, endpoint: &HubEndpoint) -> Result<Negotiated> {
    let mut endpoint = endpoint.clone();
    let mut access_token: Option<String> = None;

    for _ in 0..MAX_NEGOTIATE_REDIRECTS {
        let url = endpoint.negotiate_url()?;
        debug!(url = %url, "Negotiating hub connection");

        let mut request = http.post(url);
        if let Some(ref token) = access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetError::Negotiate(format!("hub answered {status}")));
        }

        let body: NegotiateResponse = response.json().await?;

        if let Some(ref error) = body.error {
            return Err(NetError::Negotiate(error.clone()));
        }

        if let Some(ref redirect) = body.url {
            debug!(url = %redirect, "Negotiate redirected");
            endpoint = HubEndpoint::parse(redirect)?;
            access_token = body.access_token.clone();
            continue;
        }

        if !body.supports_websockets() {
            return Err(NetError::Negotiate(
                "hub does not offer the WebSockets transport".into(),
            ));
        }

        return Ok(Negotiated {
            connection_token: body.connection_token().map(str::to_string),
            endpoint,
            access_token,
        });
    }

    Err(NetError::Negotiate("too many negotiate redirects".into()))
}
