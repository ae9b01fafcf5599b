/*
 * request.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Fermoposta, a secure mail server.
 *
 * Fermoposta is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Fermoposta is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Fermoposta.  If not, see <http://www.gnu.org/licenses/>.
 */

//! JSON-RPC 2.0 envelope parsing and the strict parameter unpacker.
//! Unpacking is key-exhaustive: every key a handler does not consume is a
//! schema violation, so typos and smuggled fields fail loudly.

use serde_json::{json, Map, Value};

use super::error::PortalError;

/// A parsed request envelope.
#[derive(Debug)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<Value>,
    pub id: Value,
}

/// Parse and validate the envelope. The version must be "2.0"; method and
/// id are required; unknown envelope keys are rejected.
pub fn parse(body: &[u8]) -> Result<RpcRequest, PortalError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| PortalError::ParseFailure(e.to_string()))?;
    let Some(object) = value.as_object() else {
        return Err(PortalError::InvalidRequest(String::from(
            "request is not an object",
        )));
    };

    for key in object.keys() {
        if !matches!(key.as_str(), "jsonrpc" | "method" | "params" | "id") {
            return Err(PortalError::InvalidRequest(format!(
                "unexpected envelope key: {}",
                key
            )));
        }
    }

    match object.get("jsonrpc").and_then(Value::as_str) {
        Some("2.0") => {}
        _ => {
            return Err(PortalError::InvalidRequest(String::from(
                "jsonrpc must be \"2.0\"",
            )))
        }
    }

    let method = match object.get("method").and_then(Value::as_str) {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => {
            return Err(PortalError::InvalidRequest(String::from(
                "method is required",
            )))
        }
    };

    let id = match object.get("id") {
        Some(id @ (Value::Number(_) | Value::String(_))) => id.clone(),
        _ => return Err(PortalError::InvalidRequest(String::from("id is required"))),
    };

    Ok(RpcRequest { method, params: object.get("params").cloned(), id })
}

/// Success envelope.
pub fn success(id: &Value, result: Value) -> String {
    json!({ "jsonrpc": "2.0", "result": result, "id": id }).to_string()
}

/// Error envelope.
pub fn failure(id: &Value, code: i64, message: &str) -> String {
    json!({ "jsonrpc": "2.0", "error": { "code": code, "message": message }, "id": id })
        .to_string()
}

// ============================================================
// Parameter unpacking
// ============================================================

/// Strict object unpacker over the request params. Handlers pull typed
/// fields; [`Params::finish`] then rejects any key left over.
pub struct Params<'a> {
    map: Option<&'a Map<String, Value>>,
    taken: Vec<String>,
}

impl<'a> Params<'a> {
    pub fn new(params: Option<&'a Value>) -> Result<Self, PortalError> {
        match params {
            None | Some(Value::Null) => Ok(Self { map: None, taken: Vec::new() }),
            Some(Value::Object(map)) => Ok(Self { map: Some(map), taken: Vec::new() }),
            Some(_) => Err(PortalError::InvalidParams(String::from(
                "params must be an object",
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.map_or(true, |m| m.is_empty())
    }

    fn fetch(&mut self, key: &str) -> Option<&'a Value> {
        self.taken.push(key.to_string());
        self.map.and_then(|m| m.get(key))
    }

    pub fn str(&mut self, key: &str) -> Result<&'a str, PortalError> {
        self.opt_str(key)?
            .ok_or_else(|| PortalError::InvalidParams(format!("{} is required", key)))
    }

    pub fn opt_str(&mut self, key: &str) -> Result<Option<&'a str>, PortalError> {
        match self.fetch(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(PortalError::InvalidParams(format!(
                "{} must be a string",
                key
            ))),
        }
    }

    pub fn u64(&mut self, key: &str) -> Result<u64, PortalError> {
        self.opt_u64(key)?
            .ok_or_else(|| PortalError::InvalidParams(format!("{} is required", key)))
    }

    pub fn opt_u64(&mut self, key: &str) -> Result<Option<u64>, PortalError> {
        match self.fetch(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
                PortalError::InvalidParams(format!("{} must be a non-negative integer", key))
            }),
            Some(_) => Err(PortalError::InvalidParams(format!(
                "{} must be an integer",
                key
            ))),
        }
    }

    pub fn u64_array(&mut self, key: &str) -> Result<Vec<u64>, PortalError> {
        match self.fetch(key) {
            None => Err(PortalError::InvalidParams(format!("{} is required", key))),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_u64().ok_or_else(|| {
                        PortalError::InvalidParams(format!(
                            "{} must contain non-negative integers",
                            key
                        ))
                    })
                })
                .collect(),
            Some(_) => Err(PortalError::InvalidParams(format!(
                "{} must be an array",
                key
            ))),
        }
    }

    pub fn str_array(&mut self, key: &str) -> Result<Vec<String>, PortalError> {
        self.opt_str_array(key)?
            .ok_or_else(|| PortalError::InvalidParams(format!("{} is required", key)))
    }

    pub fn opt_str_array(&mut self, key: &str) -> Result<Option<Vec<String>>, PortalError> {
        match self.fetch(key) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| {
                        PortalError::InvalidParams(format!("{} must contain strings", key))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(_) => Err(PortalError::InvalidParams(format!(
                "{} must be an array",
                key
            ))),
        }
    }

    pub fn object(&mut self, key: &str) -> Result<&'a Map<String, Value>, PortalError> {
        match self.fetch(key) {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(PortalError::InvalidParams(format!(
                "{} must be an object",
                key
            ))),
            None => Err(PortalError::InvalidParams(format!("{} is required", key))),
        }
    }

    /// Consume every key not yet taken, as raw pairs (config.edit and
    /// contact details use open key sets).
    pub fn rest(&mut self) -> Vec<(String, Value)> {
        let Some(map) = self.map else {
            return Vec::new();
        };
        let mut rest = Vec::new();
        for (key, value) in map {
            if !self.taken.iter().any(|t| t == key) {
                self.taken.push(key.clone());
                rest.push((key.clone(), value.clone()));
            }
        }
        rest
    }

    /// Reject unknown keys. Every handler ends with this.
    pub fn finish(self) -> Result<(), PortalError> {
        let Some(map) = self.map else {
            return Ok(());
        };
        for key in map.keys() {
            if !self.taken.iter().any(|t| t == key) {
                return Err(PortalError::InvalidParams(format!(
                    "unexpected key: {}",
                    key
                )));
            }
        }
        Ok(())
    }

    /// For parameterless methods: params must be absent or empty.
    pub fn none(self) -> Result<(), PortalError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(PortalError::InvalidParams(String::from(
                "method takes no parameters",
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_envelope() {
        let body = br#"{"jsonrpc":"2.0","method":"auth","params":{"username":"u"},"id":1}"#;
        let request = parse(body).unwrap();
        assert_eq!(request.method, "auth");
        assert_eq!(request.id, Value::from(1));
        assert!(request.params.is_some());
    }

    #[test]
    fn parse_rejects_bad_envelopes() {
        assert!(matches!(parse(b"not json"), Err(PortalError::ParseFailure(_))));
        assert!(matches!(parse(b"[1,2]"), Err(PortalError::InvalidRequest(_))));
        assert!(matches!(
            parse(br#"{"jsonrpc":"1.0","method":"auth","id":1}"#),
            Err(PortalError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse(br#"{"jsonrpc":"2.0","id":1}"#),
            Err(PortalError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse(br#"{"jsonrpc":"2.0","method":"auth"}"#),
            Err(PortalError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse(br#"{"jsonrpc":"2.0","method":"auth","id":1,"extra":true}"#),
            Err(PortalError::InvalidRequest(_))
        ));
    }

    #[test]
    fn unpacker_rejects_unknown_keys() {
        let value: Value =
            serde_json::from_str(r#"{"folderID": 3, "bogus": true}"#).unwrap();
        let mut params = Params::new(Some(&value)).unwrap();
        assert_eq!(params.u64("folderID").unwrap(), 3);
        assert!(matches!(
            params.finish(),
            Err(PortalError::InvalidParams(_))
        ));
    }

    #[test]
    fn unpacker_typed_fields() {
        let value: Value = serde_json::from_str(
            r#"{"name":"x","ids":[1,2],"tags":["a"],"maybe":null}"#,
        )
        .unwrap();
        let mut params = Params::new(Some(&value)).unwrap();
        assert_eq!(params.str("name").unwrap(), "x");
        assert_eq!(params.u64_array("ids").unwrap(), vec![1, 2]);
        assert_eq!(params.str_array("tags").unwrap(), vec!["a"]);
        assert!(params.opt_u64("missing").unwrap().is_none());
        // null is not a string
        assert!(params.opt_str("maybe").is_err());
    }

    #[test]
    fn none_enforces_emptiness() {
        let value: Value = serde_json::from_str(r#"{"k":1}"#).unwrap();
        assert!(Params::new(Some(&value)).unwrap().none().is_err());
        assert!(Params::new(None).unwrap().none().is_ok());
        let empty: Value = serde_json::from_str("{}").unwrap();
        assert!(Params::new(Some(&empty)).unwrap().none().is_ok());
    }
}
