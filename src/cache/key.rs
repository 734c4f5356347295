//! Key Generation Module
//!
//! Derives deterministic cache keys from the logical identity of a call.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Prefix of the backend key holding a record's overflow payload.
pub const SUB_KEY_PREFIX: &str = "subKey_";

// == Cache Key ==
/// SHA-256 hex digest identifying one stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Backend key of this record's overflow sub-record.
    pub fn sub_key(&self) -> String {
        format!("{SUB_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// == Operation ==
/// What is being cached: a business method or a stored procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Method {
        class_name: String,
        method_name: String,
    },
    Procedure {
        procedure_name: String,
    },
}

impl Operation {
    pub fn method(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Operation::Method {
            class_name: class_name.into(),
            method_name: method_name.into(),
        }
    }

    pub fn procedure(procedure_name: impl Into<String>) -> Self {
        Operation::Procedure {
            procedure_name: procedure_name.into(),
        }
    }

    /// Dotted rendering, e.g. `Svc.Get`.
    pub fn path(&self) -> String {
        match self {
            Operation::Method {
                class_name,
                method_name,
            } => format!("{class_name}.{method_name}"),
            Operation::Procedure { procedure_name } => procedure_name.clone(),
        }
    }
}

// == Cache Call ==
/// Logical identity of one cacheable call.
#[derive(Debug, Clone)]
pub struct CacheCall<'a, P: ?Sized> {
    pub namespace: &'a str,
    pub operation: Operation,
    pub params: &'a P,
}

impl<'a, P: Serialize + ?Sized> CacheCall<'a, P> {
    pub fn new(namespace: &'a str, operation: Operation, params: &'a P) -> Self {
        Self {
            namespace,
            operation,
            params,
        }
    }

    /// Call of `class_name.method_name(params)` in `namespace`.
    pub fn method(
        namespace: &'a str,
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        params: &'a P,
    ) -> Self {
        Self::new(namespace, Operation::method(class_name, method_name), params)
    }

    /// Call of stored procedure `procedure_name(params)` in `namespace`.
    pub fn procedure(namespace: &'a str, procedure_name: impl Into<String>, params: &'a P) -> Self {
        Self::new(namespace, Operation::procedure(procedure_name), params)
    }
}

/// Hashed material; field order is part of the key format.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyMaterial<'a> {
    name_space: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    class_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    procedure_name: Option<&'a str>,
    params: String,
    salt: &'a str,
}

// == Key Generator ==
/// Turns call identities into cache keys, isolated by a salt.
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    salt: String,
}

impl KeyGenerator {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// Derives the key for `call`.
    pub fn key_for<P: Serialize + ?Sized>(&self, call: &CacheCall<'_, P>) -> Result<CacheKey> {
        derive_key(call.namespace, &call.operation, call.params, &self.salt)
    }

    /// Derives the key for `call` with `suffix` appended to its namespace.
    pub fn key_with_namespace_suffix<P: Serialize + ?Sized>(
        &self,
        call: &CacheCall<'_, P>,
        suffix: &str,
    ) -> Result<CacheKey> {
        let namespace = format!("{}{}", call.namespace, suffix);
        derive_key(&namespace, &call.operation, call.params, &self.salt)
    }

    /// Derives a key from loose parts.
    pub fn derive<P: Serialize + ?Sized>(
        &self,
        namespace: &str,
        operation: &Operation,
        params: &P,
    ) -> Result<CacheKey> {
        derive_key(namespace, operation, params, &self.salt)
    }
}

/// Hashes `{namespace, operation, params, salt}` into a key.
///
/// Parameters are first normalised through `serde_json::Value`, which sorts
/// map keys, so logically equal maps hash equally. Fails when the
/// parameters cannot be represented as JSON; callers treat that as
/// "do not cache this call".
pub fn derive_key<P: Serialize + ?Sized>(
    namespace: &str,
    operation: &Operation,
    params: &P,
    salt: &str,
) -> Result<CacheKey> {
    let normalized = serde_json::to_value(params)?;
    let params = serde_json::to_string(&normalized)?;

    let (class_name, method_name, procedure_name) = match operation {
        Operation::Method {
            class_name,
            method_name,
        } => (Some(class_name.as_str()), Some(method_name.as_str()), None),
        Operation::Procedure { procedure_name } => (None, None, Some(procedure_name.as_str())),
    };

    let material = KeyMaterial {
        name_space: namespace,
        class_name,
        method_name,
        procedure_name,
        params,
        salt,
    };

    let digest = Sha256::digest(serde_json::to_vec(&material)?);
    Ok(CacheKey(hex::encode(digest)))
}
