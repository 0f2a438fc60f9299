//! Client for the data-proxy collaborator supplying mail and calendar
//! content to executors.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

/// Default data-proxy request timeout
pub const DEFAULT_DATA_PROXY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum DataProxyError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("data proxy returned {status} for {path}")]
    Status { status: u16, path: String },
}

#[derive(Debug, Clone)]
pub struct DataProxyClient {
    client: Client,
    base_url: String,
}

impl DataProxyClient {
    /// The timeout bounds every request; a client that cannot carry it is a
    /// construction error, not a fallback.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DataProxyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// GET `{base}/{path}` for one tenant and return the item collection.
    ///
    /// The collection is taken from the first of the response keys `data`,
    /// `value`, `messages`; a top-level JSON array is accepted as-is, and
    /// any other shape is an empty collection.
    pub async fn fetch_items(
        &self,
        tenant_id: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<serde_json::Value>, DataProxyError> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        debug!("fetching {} for tenant {}", url, tenant_id);
        let response = self
            .client
            .get(&url)
            .header("X-Tenant-Id", tenant_id)
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DataProxyError::Status {
                status: response.status().as_u16(),
                path: path.to_string(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        Ok(extract_items(body))
    }
}

fn extract_items(body: serde_json::Value) -> Vec<serde_json::Value> {
    if let serde_json::Value::Array(items) = body {
        return items;
    }
    for key in ["data", "value", "messages"] {
        if let Some(serde_json::Value::Array(items)) = body.get(key) {
            return items.clone();
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_prefers_data_then_value_then_messages() {
        let items = extract_items(json!({"data": [1, 2], "value": [3]}));
        assert_eq!(items, vec![json!(1), json!(2)]);

        let items = extract_items(json!({"value": [3], "messages": [4]}));
        assert_eq!(items, vec![json!(3)]);

        let items = extract_items(json!({"messages": [4]}));
        assert_eq!(items, vec![json!(4)]);
    }

    #[test]
    fn extract_accepts_top_level_array() {
        let items = extract_items(json!([{"id": 1}]));
        assert_eq!(items, vec![json!({"id": 1})]);
    }

    #[test]
    fn extract_defaults_to_empty() {
        assert!(extract_items(json!({"count": 0})).is_empty());
        assert!(extract_items(json!("nope")).is_empty());
    }
}
