use crate::broken::CardSource;
use crate::model::{AdvancedFlow, CardKind, Device, Flow, FlowCard, Listing, Variable, Zone};
use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue, USER_AGENT};
use reqwest::{Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking session against the local API of one hub.
#[derive(Debug, Clone)]
pub struct HubClient {
    base_url: Url,
    http: Client,
    token: String,
}

impl HubClient {
    pub fn new(address: &str, token: &str, verify_tls: bool) -> Result<Self> {
        let mut parsed = Url::parse(address).context("parsing hub address")?;
        // Url::join drops the last segment unless the path ends with '/'.
        if !parsed.path().ends_with('/') {
            let path = format!("{}/", parsed.path());
            parsed.set_path(&path);
        }
        let http = Client::builder()
            .user_agent(HeaderValue::from_static("homeyctl/0.1"))
            .danger_accept_invalid_certs(!verify_tls)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            base_url: parsed,
            http,
            token: token.to_string(),
        })
    }

    pub fn get_devices(&self) -> Result<Listing<Device>> {
        self.get_json("api/manager/devices/device/")
            .context("fetching devices")
    }

    pub fn get_zones(&self) -> Result<Listing<Zone>> {
        self.get_json("api/manager/zones/zone/")
            .context("fetching zones")
    }

    pub fn get_flows(&self) -> Result<Listing<Flow>> {
        self.get_json("api/manager/flow/flow/")
            .context("fetching flows")
    }

    pub fn get_advanced_flows(&self) -> Result<Listing<AdvancedFlow>> {
        self.get_json("api/manager/flow/advancedflow/")
            .context("fetching advanced flows")
    }

    pub fn get_variables(&self) -> Result<Listing<Variable>> {
        self.get_json("api/manager/logic/variable/")
            .context("fetching variables")
    }

    /// Raw listings for the dump commands, untouched by the typed model.
    pub fn get_raw(&self, path: &str) -> Result<Value> {
        self.get_json(path)
    }

    /// Flow token listing, keyed by token id.
    pub fn get_flow_tokens(&self) -> Result<Listing<Value>> {
        self.get_json("api/manager/flowtoken/flowtoken/")
            .context("fetching flow tokens")
    }

    pub fn get_flow_card(&self, kind: CardKind, id: &str) -> Result<FlowCard> {
        let url = self.entity_url(&format!("api/manager/flow/{}/", kind.endpoint()), id)?;
        self.send(Method::GET, url, Option::<&()>::None)
    }

    pub fn update_device(&self, id: &str, patch: &Value) -> Result<Value> {
        let url = self.entity_url("api/manager/devices/device/", id)?;
        self.send(Method::PUT, url, Some(patch))
    }

    pub fn update_variable(&self, id: &str, patch: &Value) -> Result<Value> {
        let url = self.entity_url("api/manager/logic/variable/", id)?;
        self.send(Method::PUT, url, Some(patch))
    }

    pub fn update_flow(&self, id: &str, patch: &Value) -> Result<Value> {
        let url = self.entity_url("api/manager/flow/flow/", id)?;
        self.send(Method::PUT, url, Some(patch))
    }

    pub fn update_advanced_flow(&self, id: &str, patch: &Value) -> Result<Value> {
        let url = self.entity_url("api/manager/flow/advancedflow/", id)?;
        self.send(Method::PUT, url, Some(patch))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("joining path `{}` to hub address", path))?;
        self.send(Method::GET, url, Option::<&()>::None)
    }

    /// `collection` followed by one percent-encoded id segment.
    fn entity_url(&self, collection: &str, id: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join(collection)
            .with_context(|| format!("joining path `{}` to hub address", collection))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("hub address cannot be a base URL"))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    fn send<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<T> {
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .header(USER_AGENT, HeaderValue::from_static("homeyctl/0.1"));

        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(%method, %url, "sending request");
        let response = request
            .send()
            .with_context(|| format!("sending {} {}", method, url))?;

        let status = response.status();
        let text = response.text().context("reading response body")?;
        if !status.is_success() {
            return Err(anyhow!(
                "HTTP {} at {}: {}",
                status,
                url,
                hub_error_message(&text)
            ));
        }

        // Writes may answer with an empty body.
        let text = if text.trim().is_empty() {
            "null"
        } else {
            text.as_str()
        };
        serde_json::from_str(text).with_context(|| format!("decoding response from {}", url))
    }
}

impl CardSource for HubClient {
    fn card(&self, kind: CardKind, id: &str) -> Result<FlowCard> {
        self.get_flow_card(kind, id)
    }
}

/// The hub reports failures as `{"error": "..."}`; fall back to a body excerpt.
fn hub_error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body)
        && let Some(msg) = json.get("error").and_then(Value::as_str)
    {
        return msg.to_string();
    }
    let trimmed = body.trim();
    if trimmed.chars().count() > 200 {
        format!("{}...", trimmed.chars().take(200).collect::<String>())
    } else {
        trimmed.to_string()
    }
}
