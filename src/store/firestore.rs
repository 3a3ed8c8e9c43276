use std::env;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{
    set_path, Document, FieldMutation, Fields, Filter, Result, Store, StoreError, WriteOp,
};

const API_BASE: &str = "https://firestore.googleapis.com/v1";

/// A Firestore REST implementation of the document store.
///
/// Atomic batches map to a single `commit` call, and dotted field paths
/// map to `updateMask.fieldPaths`, where a masked path absent from the
/// written fields removes that field.
pub struct FirestoreStore {
    client: Client,
    project_id: String,
    api_key: String,
    token: Option<String>,
}

impl FirestoreStore {
    pub fn new(project_id: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            project_id: project_id.to_string(),
            api_key: api_key.to_string(),
            token: None,
        }
    }

    /// Creates a store from `APPDEX_FIREBASE_PROJECT_ID` and
    /// `APPDEX_FIREBASE_API_KEY`
    pub fn from_env() -> Self {
        let project_id =
            env::var("APPDEX_FIREBASE_PROJECT_ID").expect("APPDEX_FIREBASE_PROJECT_ID is set");
        let api_key = env::var("APPDEX_FIREBASE_API_KEY").expect("APPDEX_FIREBASE_API_KEY is set");

        Self::new(&project_id, &api_key)
    }

    /// Attaches the signed-in identity's token, so the store's security
    /// rules see the calling user
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    fn resource_root(&self) -> String {
        format!(
            "projects/{}/databases/(default)/documents",
            self.project_id
        )
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.resource_root(), collection, id)
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/{}/{}", API_BASE, self.resource_root(), collection)
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}", API_BASE, self.document_name(collection, id))
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.query(&[("key", self.api_key.as_str())]);

        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = self
            .request(builder)
            .send()
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(remote_error(response).await);
        }

        Ok(response)
    }

    fn encode_write(&self, write: &WriteOp) -> Value {
        match write {
            WriteOp::Put {
                collection,
                id,
                fields,
            } => json!({
                "update": {
                    "name": self.document_name(collection, id),
                    "fields": encode_fields(fields),
                },
            }),
            WriteOp::Update {
                collection,
                id,
                mutations,
            } => {
                let mut fields = Fields::new();
                let mut paths = Vec::new();

                for mutation in mutations {
                    paths.push(mutation.path().to_string());

                    if let FieldMutation::Set(path, value) = mutation {
                        set_path(&mut fields, path, value.clone());
                    }
                }

                json!({
                    "update": {
                        "name": self.document_name(collection, id),
                        "fields": encode_fields(&fields),
                    },
                    "updateMask": { "fieldPaths": paths },
                    "currentDocument": { "exists": true },
                })
            }
            WriteOp::Delete { collection, id } => json!({
                "delete": self.document_name(collection, id),
            }),
        }
    }
}

#[async_trait]
impl Store for FirestoreStore {
    async fn get_all(&self, collection: &'static str) -> Result<Vec<Document>> {
        let response = self.send(self.client.get(self.collection_url(collection))).await?;

        let list: ListResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))?;

        list.documents.into_iter().map(RestDocument::into_document).collect()
    }

    async fn get(&self, collection: &'static str, id: &str) -> Result<Document> {
        let response = self
            .request(self.client.get(self.document_url(collection, id)))
            .send()
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                collection,
                id: id.to_string(),
            });
        }

        if !status.is_success() {
            return Err(remote_error(response).await);
        }

        let document: RestDocument = response
            .json()
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))?;

        document.into_document()
    }

    async fn query(&self, collection: &'static str, filter: Filter) -> Result<Vec<Document>> {
        let (field, op, value) = match &filter {
            Filter::Equal(field, value) => (*field, "EQUAL", value),
            Filter::ArrayContains(field, value) => (*field, "ARRAY_CONTAINS", value),
        };

        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": field },
                        "op": op,
                        "value": encode_value(value),
                    },
                },
            },
        });

        let url = format!("{}/{}:runQuery", API_BASE, self.resource_root());
        let response = self.send(self.client.post(url).json(&body)).await?;

        let rows: Vec<QueryRow> = response
            .json()
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))?;

        rows.into_iter()
            .filter_map(|row| row.document)
            .map(RestDocument::into_document)
            .collect()
    }

    async fn add(&self, collection: &'static str, fields: Fields) -> Result<Document> {
        let body = json!({ "fields": encode_fields(&fields) });

        let response = self
            .send(self.client.post(self.collection_url(collection)).json(&body))
            .await?;

        let document: RestDocument = response
            .json()
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))?;

        document.into_document()
    }

    async fn apply(&self, writes: Vec<WriteOp>) -> Result<()> {
        let body = json!({
            "writes": writes.iter().map(|w| self.encode_write(w)).collect::<Vec<_>>(),
        });

        let url = format!("{}/{}:commit", API_BASE, self.resource_root());
        self.send(self.client.post(url).json(&body)).await?;

        Ok(())
    }

    async fn delete(&self, collection: &'static str, id: &str) -> Result<()> {
        self.send(self.client.delete(self.document_url(collection, id)))
            .await?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    documents: Vec<RestDocument>,
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    document: Option<RestDocument>,
}

#[derive(Debug, Deserialize)]
struct RestDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl RestDocument {
    fn into_document(self) -> Result<Document> {
        let id = self
            .name
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let fields = self
            .fields
            .iter()
            .map(|(key, value)| (key.clone(), decode_value(value)))
            .collect();

        Ok(Document { id, fields })
    }
}

fn encode_fields(fields: &Fields) -> Value {
    let encoded: Map<_, _> = fields
        .iter()
        .map(|(key, value)| (key.clone(), encode_value(value)))
        .collect();

    Value::Object(encoded)
}

/// Encodes a plain JSON value into Firestore's typed value form
fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // Integers travel as strings on the wire
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(values) => json!({
            "arrayValue": { "values": values.iter().map(encode_value).collect::<Vec<_>>() },
        }),
        Value::Object(map) => json!({
            "mapValue": {
                "fields": map
                    .iter()
                    .map(|(key, value)| (key.clone(), encode_value(value)))
                    .collect::<Map<_, _>>(),
            },
        }),
    }
}

/// Decodes Firestore's typed value form back into plain JSON
fn decode_value(value: &Value) -> Value {
    let map = match value.as_object() {
        Some(map) => map,
        None => return Value::Null,
    };

    if let Some(v) = map.get("stringValue").or_else(|| map.get("timestampValue")) {
        return v.clone();
    }

    if let Some(v) = map.get("integerValue") {
        return v
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or(Value::Null);
    }

    if let Some(v) = map.get("doubleValue").or_else(|| map.get("booleanValue")) {
        return v.clone();
    }

    if let Some(v) = map.get("arrayValue") {
        let values = v
            .get("values")
            .and_then(Value::as_array)
            .map(|values| values.iter().map(decode_value).collect())
            .unwrap_or_default();

        return Value::Array(values);
    }

    if let Some(v) = map.get("mapValue") {
        let fields = v
            .get("fields")
            .and_then(Value::as_object)
            .map(|fields| {
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), decode_value(value)))
                    .collect()
            })
            .unwrap_or_default();

        return Value::Object(fields);
    }

    Value::Null
}

async fn remote_error(response: Response) -> StoreError {
    let result = response.text().await;

    match result {
        Ok(text) => StoreError::Remote(text),
        Err(e) => StoreError::Remote(e.to_string()),
    }
}
