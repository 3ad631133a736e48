//! JSON-RPC remote data adapter.
//!
//! Thin client for the ERP's external RPC endpoint (`execute_kw` dispatch).
//! Transport and fault classification only; sync policy lives in
//! `crate::sync`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::models::RawRecord;
use crate::remote::{FetchOptions, FieldMeta, Filter, RemoteDataSource};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Connection settings for one remote endpoint
#[derive(Clone)]
pub struct RpcConfig {
    /// JSON-RPC endpoint, e.g. `https://erp.example.com/jsonrpc`
    pub endpoint: String,
    pub database: String,
    pub user_id: i64,
    pub api_key: String,
}

impl std::fmt::Debug for RpcConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RpcConfig")
            .field("endpoint", &self.endpoint)
            .field("database", &self.database)
            .field("user_id", &self.user_id)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Remote data source speaking the ERP's JSON-RPC protocol
pub struct JsonRpcRemote {
    config: RpcConfig,
    client: reqwest::Client,
}

impl JsonRpcRemote {
    pub fn new(mut config: RpcConfig, timeout: Duration) -> Result<Self> {
        config.endpoint = normalize_endpoint(config.endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Connectivity(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Resolve the numeric user id for a login + API key pair.
    ///
    /// The only session-lifecycle call the core knows about.
    pub async fn authenticate(
        endpoint: &str,
        database: &str,
        login: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<i64> {
        let endpoint = normalize_endpoint(endpoint.to_string())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Connectivity(e.to_string()))?;

        let body = rpc_envelope(
            "common",
            "authenticate",
            json!([database, login, api_key, {}]),
        );
        let result = dispatch(&client, &endpoint, &body).await?;
        result
            .as_i64()
            .ok_or_else(|| Error::Apply("authentication rejected by the remote".to_string()))
    }

    async fn execute_kw(
        &self,
        entity_type: &str,
        method: &str,
        args: Value,
        kwargs: Value,
    ) -> Result<Value> {
        let body = rpc_envelope(
            "object",
            "execute_kw",
            json!([
                self.config.database,
                self.config.user_id,
                self.config.api_key,
                entity_type,
                method,
                args,
                kwargs
            ]),
        );
        dispatch(&self.client, &self.config.endpoint, &body)
            .await
            .map_err(|e| classify_fault(entity_type, method, e))
    }
}

impl RemoteDataSource for JsonRpcRemote {
    async fn count_records(&self, entity_type: &str, filter: &Filter) -> Result<u64> {
        let result = self
            .execute_kw(entity_type, "search_count", json!([filter.to_wire()]), json!({}))
            .await?;
        result.as_u64().ok_or_else(|| {
            Error::schema(entity_type, "search_count returned a non-numeric result")
        })
    }

    async fn fetch_records(
        &self,
        entity_type: &str,
        filter: &Filter,
        fields: &[String],
        options: &FetchOptions,
    ) -> Result<Vec<RawRecord>> {
        let mut kwargs = json!({
            "fields": fields,
            "offset": options.offset,
            "order": options.order,
        });
        if let Some(limit) = options.limit {
            kwargs["limit"] = json!(limit);
        }

        let result = self
            .execute_kw(entity_type, "search_read", json!([filter.to_wire()]), kwargs)
            .await?;
        let Value::Array(rows) = result else {
            return Err(Error::schema(
                entity_type,
                "search_read returned a non-list result",
            ));
        };
        rows.into_iter()
            .map(|row| match row {
                Value::Object(map) => Ok(map),
                _ => Err(Error::schema(
                    entity_type,
                    "search_read returned a non-record row",
                )),
            })
            .collect()
    }

    async fn describe_fields(&self, entity_type: &str) -> Result<BTreeMap<String, FieldMeta>> {
        let result = self
            .execute_kw(
                entity_type,
                "fields_get",
                json!([]),
                json!({"attributes": ["type", "string", "required", "relation"]}),
            )
            .await?;
        serde_json::from_value(result).map_err(|e| {
            Error::schema(entity_type, format!("unexpected fields_get payload: {e}"))
        })
    }

    async fn apply_create(&self, entity_type: &str, payload: &Value) -> Result<i64> {
        let result = self
            .execute_kw(entity_type, "create", json!([payload]), json!({}))
            .await?;
        result
            .as_i64()
            .ok_or_else(|| Error::Apply("create returned a non-numeric id".to_string()))
    }

    async fn apply_update(
        &self,
        entity_type: &str,
        record_id: i64,
        payload: &Value,
    ) -> Result<bool> {
        let result = self
            .execute_kw(entity_type, "write", json!([[record_id], payload]), json!({}))
            .await?;
        result
            .as_bool()
            .ok_or_else(|| Error::Apply("write returned a non-boolean result".to_string()))
    }

    async fn apply_delete(&self, entity_type: &str, record_id: i64) -> Result<bool> {
        let result = self
            .execute_kw(entity_type, "unlink", json!([[record_id]]), json!({}))
            .await?;
        result
            .as_bool()
            .ok_or_else(|| Error::Apply("unlink returned a non-boolean result".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<RpcFaultData>,
}

#[derive(Debug, Deserialize)]
struct RpcFaultData {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

fn rpc_envelope(service: &str, method: &str, args: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "call",
        "params": {
            "service": service,
            "method": method,
            "args": args,
        },
        "id": 1,
    })
}

async fn dispatch(client: &reqwest::Client, endpoint: &str, body: &Value) -> Result<Value> {
    let response = client
        .post(endpoint)
        .json(body)
        .send()
        .await
        .map_err(|e| Error::Connectivity(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Connectivity(format!("HTTP {}", status.as_u16())));
    }

    let payload = response
        .json::<RpcResponse>()
        .await
        .map_err(|e| Error::Connectivity(format!("invalid RPC response: {e}")))?;

    if let Some(fault) = payload.error {
        return Err(Error::Apply(fault_message(&fault)));
    }
    Ok(payload.result.unwrap_or(Value::Null))
}

/// Server faults arrive as a generic `Apply`; reads reclassify to `Schema`
/// so the orchestrator can skip the entity type and carry on
fn classify_fault(entity_type: &str, method: &str, error: Error) -> Error {
    let Error::Apply(message) = error else {
        return error;
    };
    if matches!(method, "create" | "write" | "unlink") {
        Error::Apply(message)
    } else {
        Error::schema(entity_type, message)
    }
}

fn fault_message(fault: &RpcFault) -> String {
    let detail = fault
        .data
        .as_ref()
        .and_then(|data| data.message.clone().or_else(|| data.name.clone()));
    let message = detail.unwrap_or_else(|| fault.message.clone());
    let message = compact_text(&message);
    if message.is_empty() {
        "unspecified server fault".to_string()
    } else {
        message
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("endpoint must not be empty".to_string()))?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("erp.example.com".to_string()).is_err());
        assert_eq!(
            normalize_endpoint("https://erp.example.com/jsonrpc/".to_string()).unwrap(),
            "https://erp.example.com/jsonrpc"
        );
    }

    #[test]
    fn rpc_config_debug_redacts_api_key() {
        let config = RpcConfig {
            endpoint: "https://erp.example.com/jsonrpc".to_string(),
            database: "prod".to_string(),
            user_id: 2,
            api_key: "secret".to_string(),
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn envelope_carries_service_and_method() {
        let body = rpc_envelope("object", "execute_kw", json!(["db"]));
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["method"], "call");
        assert_eq!(body["params"]["service"], "object");
        assert_eq!(body["params"]["method"], "execute_kw");
        assert_eq!(body["params"]["args"], json!(["db"]));
    }

    #[test]
    fn fault_message_prefers_data_message() {
        let fault = RpcFault {
            message: "Odoo Server Error".to_string(),
            data: Some(RpcFaultData {
                message: Some("Object crm.missing doesn't exist".to_string()),
                name: None,
            }),
        };
        assert_eq!(fault_message(&fault), "Object crm.missing doesn't exist");

        let bare = RpcFault {
            message: String::new(),
            data: None,
        };
        assert_eq!(fault_message(&bare), "unspecified server fault");
    }

    #[test]
    fn faults_on_reads_become_schema_errors() {
        let err = classify_fault(
            "crm.missing",
            "search_read",
            Error::Apply("Object crm.missing doesn't exist".to_string()),
        );
        assert!(matches!(err, Error::Schema { .. }));

        let err = classify_fault(
            "res.partner",
            "write",
            Error::Apply("validation failed".to_string()),
        );
        assert!(matches!(err, Error::Apply(_)));

        let err = classify_fault(
            "res.partner",
            "search_read",
            Error::Connectivity("timed out".to_string()),
        );
        assert!(err.is_connectivity());
    }
}
