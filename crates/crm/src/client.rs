//! HTTP implementation of the CRM collaborator contract.

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde_json::{json, Value};
use std::time::Duration;

use modelflow_core::{
    traits::CrmClient,
    types::WorkflowDefinition,
    Error, Result,
};

/// Client for the CRM service's REST API.
///
/// Every call can fail with a transport error; callers treat those as
/// node-local failures, not process crashes.
pub struct HttpCrmClient {
    base_url: String,
    api_key: Option<Secret<String>>,
    client: reqwest::Client,
}

impl HttpCrmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<Secret<String>>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::crm(format!("Failed to build CRM client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        builder
    }

    async fn get_json(&self, path: &str) -> Result<Option<Value>> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|e| Error::crm(format!("CRM request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::crm(format!(
                "CRM returned status {} for {}",
                response.status(),
                path
            )));
        }

        let value = response
            .json()
            .await
            .map_err(|e| Error::crm(format!("Bad CRM payload: {}", e)))?;
        Ok(Some(value))
    }

    async fn get_list(&self, path: &str) -> Result<Vec<Value>> {
        match self.get_json(path).await? {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(Error::crm(format!(
                "CRM returned non-list payload for {}: {}",
                path, other
            ))),
            None => Ok(Vec::new()),
        }
    }

    async fn send_json(&self, method: reqwest::Method, path: &str, body: &Value) -> Result<Option<Value>> {
        let response = self
            .request(method, path)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::crm(format!("CRM request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::crm(format!(
                "CRM returned status {} for {}",
                response.status(),
                path
            )));
        }

        let value = response
            .json()
            .await
            .map_err(|e| Error::crm(format!("Bad CRM payload: {}", e)))?;
        Ok(Some(value))
    }
}

#[async_trait]
impl CrmClient for HttpCrmClient {
    async fn get_lead(&self, lead_id: &str) -> Result<Option<Value>> {
        self.get_json(&format!("/api/leads/{}", lead_id)).await
    }

    async fn update_lead(&self, lead_id: &str, patch: &Value) -> Result<Option<Value>> {
        self.send_json(
            reqwest::Method::PUT,
            &format!("/api/leads/{}", lead_id),
            patch,
        )
        .await
    }

    async fn send_message(&self, lead_id: &str, content: &str) -> Result<Option<Value>> {
        let body = json!({
            "leadId": lead_id,
            "content": content,
            "messageType": "TEXT",
        });
        self.send_json(reqwest::Method::POST, "/api/messages/send", &body)
            .await
    }

    async fn get_workflow_definition(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowDefinition>> {
        match self
            .get_json(&format!("/api/workflows/{}", workflow_id))
            .await?
        {
            Some(value) => {
                let definition = serde_json::from_value(value)
                    .map_err(|e| Error::crm(format!("Bad workflow definition: {}", e)))?;
                Ok(Some(definition))
            }
            None => Ok(None),
        }
    }

    async fn get_lead_interactions(&self, lead_id: &str) -> Result<Vec<Value>> {
        self.get_list(&format!("/api/leads/{}/interactions", lead_id))
            .await
    }

    async fn get_lead_messages(&self, lead_id: &str) -> Result<Vec<Value>> {
        self.get_list(&format!("/api/messages/lead/{}", lead_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client =
            HttpCrmClient::new("http://crm.local/", None, Duration::from_secs(30)).unwrap();
        assert_eq!(client.base_url, "http://crm.local");
    }
}
