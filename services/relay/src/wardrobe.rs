use crate::config::FirestoreConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};

/// A clothing item from a user's closet, fields flattened to plain JSON
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WardrobeItem {
    /// Document ID
    pub id: String,
    pub fields: Map<String, Value>,
}

/// Wardrobe query seam used by the HTTP handlers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WardrobeStore: Send + Sync {
    /// Newest-first items of one user, at most `limit`
    async fn recent_items(&self, user_id: &str, limit: usize) -> Result<Vec<WardrobeItem>>;
}

/// One row of a `runQuery` response stream
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunQueryRow {
    document: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl From<Document> for WardrobeItem {
    fn from(doc: Document) -> Self {
        let id = doc
            .name
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let fields = doc
            .fields
            .iter()
            .map(|(key, value)| (key.clone(), decode_value(value)))
            .collect();

        Self { id, fields }
    }
}

/// Flatten a Firestore typed value (`{"stringValue": "x"}`) to plain JSON
pub fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|o| o.iter().next()) else {
        return value.clone();
    };

    match kind.as_str() {
        "nullValue" => Value::Null,
        "integerValue" => match inner {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or_else(|_| inner.clone()),
            _ => inner.clone(),
        },
        "mapValue" => {
            let fields = inner
                .get("fields")
                .and_then(Value::as_object)
                .map(|fields| {
                    fields
                        .iter()
                        .map(|(k, v)| (k.clone(), decode_value(v)))
                        .collect::<Map<_, _>>()
                })
                .unwrap_or_default();
            Value::Object(fields)
        }
        "arrayValue" => {
            let values = inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default();
            Value::Array(values)
        }
        "stringValue" | "booleanValue" | "doubleValue" | "timestampValue" | "referenceValue"
        | "bytesValue" | "geoPointValue" => inner.clone(),
        _ => value.clone(),
    }
}

/// Firestore REST reader for `users/{userId}/closet`
pub struct FirestoreWardrobe {
    http: reqwest::Client,
    documents_url: String,
    access_token: Option<String>,
    users_collection: String,
    closet_collection: String,
    order_field: String,
}

impl FirestoreWardrobe {
    /// Create a new wardrobe reader
    pub fn new(config: &FirestoreConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build Firestore HTTP client")?;

        let documents_url = format!(
            "{}/v1/projects/{}/databases/{}/documents",
            config.base_url.trim_end_matches('/'),
            config.project_id,
            config.database_id
        );

        info!(
            project_id = %config.project_id,
            collection = %format!("{}/{{userId}}/{}", config.users_collection, config.closet_collection),
            "Firestore wardrobe initialized"
        );

        Ok(Self {
            http,
            documents_url,
            access_token: config.access_token.clone(),
            users_collection: config.users_collection.clone(),
            closet_collection: config.closet_collection.clone(),
            order_field: config.order_field.clone(),
        })
    }

    /// `{documents}/{users}/{userId}:runQuery` with the user ID percent-encoded
    fn run_query_url(&self, user_id: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.documents_url)
            .with_context(|| format!("Invalid Firestore URL: {}", self.documents_url))?;

        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Firestore URL cannot be a base"))?
            .push(&self.users_collection)
            .push(&format!("{user_id}:runQuery"));

        Ok(url)
    }

    fn structured_query(&self, limit: usize) -> Value {
        json!({
            "structuredQuery": {
                "from": [{ "collectionId": self.closet_collection }],
                "orderBy": [{
                    "field": { "fieldPath": self.order_field },
                    "direction": "DESCENDING"
                }],
                "limit": limit
            }
        })
    }
}

#[async_trait]
impl WardrobeStore for FirestoreWardrobe {
    #[instrument(skip(self))]
    async fn recent_items(&self, user_id: &str, limit: usize) -> Result<Vec<WardrobeItem>> {
        let url = self.run_query_url(user_id)?;

        let mut request = self.http.post(url).json(&self.structured_query(limit));
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("Failed to query wardrobe items")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "Firestore runQuery returned {}: {}",
                status,
                body.chars().take(512).collect::<String>()
            );
        }

        let rows: Vec<RunQueryRow> = response
            .json()
            .await
            .context("Failed to decode runQuery response")?;

        // An empty result still yields one row carrying only readTime
        let items: Vec<WardrobeItem> = rows
            .into_iter()
            .filter_map(|row| row.document)
            .map(WardrobeItem::from)
            .collect();

        debug!(user_id = %user_id, count = items.len(), "Wardrobe items fetched");

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> FirestoreConfig {
        FirestoreConfig {
            project_id: "codipop-test".to_string(),
            database_id: "(default)".to_string(),
            base_url,
            access_token: Some("owner".to_string()),
            users_collection: "users".to_string(),
            closet_collection: "closet".to_string(),
            order_field: "createdAt".to_string(),
            recent_item_limit: 5,
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_decode_scalar_values() {
        assert_eq!(decode_value(&json!({"stringValue": "셔츠"})), json!("셔츠"));
        assert_eq!(decode_value(&json!({"integerValue": "42"})), json!(42));
        assert_eq!(decode_value(&json!({"doubleValue": 1.5})), json!(1.5));
        assert_eq!(decode_value(&json!({"booleanValue": true})), json!(true));
        assert_eq!(decode_value(&json!({"nullValue": null})), Value::Null);
        assert_eq!(
            decode_value(&json!({"timestampValue": "2025-09-01T10:00:00Z"})),
            json!("2025-09-01T10:00:00Z")
        );
    }

    #[test]
    fn test_decode_nested_values() {
        let value = json!({
            "mapValue": {"fields": {
                "tags": {"arrayValue": {"values": [{"stringValue": "봄"}, {"stringValue": "가을"}]}},
                "size": {"integerValue": "95"}
            }}
        });

        assert_eq!(
            decode_value(&value),
            json!({"tags": ["봄", "가을"], "size": 95})
        );
        assert_eq!(decode_value(&json!({"arrayValue": {}})), json!([]));
    }

    #[test]
    fn test_run_query_url_encodes_user_id() {
        let wardrobe = FirestoreWardrobe::new(&test_config("http://localhost:8080".to_string())).unwrap();

        let url = wardrobe.run_query_url("user 1").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/v1/projects/codipop-test/databases/(default)/documents/users/user%201:runQuery"
        );
    }

    #[tokio::test]
    async fn test_recent_items_query() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/projects/codipop-test/databases/(default)/documents/users/u1:runQuery"))
            .and(header("authorization", "Bearer owner"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "document": {
                        "name": "projects/codipop-test/databases/(default)/documents/users/u1/closet/item2",
                        "fields": {"name": {"stringValue": "니트"}, "createdAt": {"timestampValue": "2025-09-02T00:00:00Z"}}
                    },
                    "readTime": "2025-09-03T00:00:00Z"
                },
                {
                    "document": {
                        "name": "projects/codipop-test/databases/(default)/documents/users/u1/closet/item1",
                        "fields": {"name": {"stringValue": "청바지"}}
                    },
                    "readTime": "2025-09-03T00:00:00Z"
                }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let wardrobe = FirestoreWardrobe::new(&test_config(server.uri())).unwrap();
        let items = wardrobe.recent_items("u1", 5).await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "item2");
        assert_eq!(items[0].fields["name"], json!("니트"));
        assert_eq!(items[1].id, "item1");

        let requests = server.received_requests().await.unwrap();
        let body: Value = requests[0].body_json().unwrap();
        let query = &body["structuredQuery"];
        assert_eq!(query["from"][0]["collectionId"], "closet");
        assert_eq!(query["orderBy"][0]["field"]["fieldPath"], "createdAt");
        assert_eq!(query["orderBy"][0]["direction"], "DESCENDING");
        assert_eq!(query["limit"], 5);
    }

    #[tokio::test]
    async fn test_empty_result_has_no_items() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"readTime": "2025-09-03T00:00:00Z"}])),
            )
            .mount(&server)
            .await;

        let wardrobe = FirestoreWardrobe::new(&test_config(server.uri())).unwrap();
        let items = wardrobe.recent_items("nobody", 5).await.unwrap();

        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("PERMISSION_DENIED"))
            .mount(&server)
            .await;

        let wardrobe = FirestoreWardrobe::new(&test_config(server.uri())).unwrap();
        let err = wardrobe.recent_items("u1", 5).await.unwrap_err();

        assert!(err.to_string().contains("403"));
    }
}
