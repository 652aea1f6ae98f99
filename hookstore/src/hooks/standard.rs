use super::{dispatch, Hook, HookContext, HookFailure, HookResult};
use crate::document::{is_absent, Document, ID_FIELD};
use crate::error::HookstoreError;
use crate::query::{Query, SortOrder};
use crate::schema::HookSpec;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use chrono::Local;
use serde_json::{json, Value};
use std::fmt::Write;

/// Missing, null or an empty string.
fn is_blank(value: Option<&Value>) -> bool {
    is_absent(value) || value.and_then(Value::as_str).map_or(false, str::is_empty)
}

/// `{type: increment}`: on insert, an absent field becomes the collection's
/// highest value for it plus one. Read-then-write, so not safe under
/// concurrent inserts.
pub struct IncrementHook;

#[async_trait]
impl Hook for IncrementHook {
    async fn apply(&self, value: Option<&Value>, ctx: &HookContext<'_>) -> HookResult {
        if !is_absent(value) || !ctx.is_insert() {
            return Ok(None);
        }
        let query = Query::default().sorted(ctx.field, SortOrder::Desc).paged(1, 1);
        let found = ctx.collection.find(&query).await?;
        let max = found
            .documents
            .first()
            .and_then(|doc| doc.get(ctx.field))
            .map(|current| match current {
                Value::Number(n) => n.as_i64().unwrap_or(0),
                Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
                _ => 0,
            })
            .unwrap_or(0);
        Ok(Some(Value::from(max + 1)))
    }
}

/// `{type: unique}`: no other record may hold the same value. The record
/// being updated does not conflict with itself.
pub struct UniqueHook;

#[async_trait]
impl Hook for UniqueHook {
    async fn apply(&self, value: Option<&Value>, ctx: &HookContext<'_>) -> HookResult {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        let mut filter = Document::new();
        filter.insert(ctx.field.to_string(), value.clone());
        if let Some(own_id) = ctx.previous.get(ID_FIELD) {
            filter.insert(ID_FIELD.to_string(), json!({ "$ne": own_id }));
        }
        if ctx.collection.count(&filter).await? > 0 {
            return Err(HookFailure::Invalid(format!(
                "must be a unique value \"{}\"",
                ctx.field
            )));
        }
        Ok(None)
    }
}

/// `{type: exists, collection?: name, key?: field}`: the value must be
/// present as `key` (default `_id`) in `collection` (default: this one).
pub struct ExistsHook;

#[async_trait]
impl Hook for ExistsHook {
    async fn apply(&self, value: Option<&Value>, ctx: &HookContext<'_>) -> HookResult {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        let key = ctx.spec.arg_str("key").unwrap_or(ID_FIELD);
        let target_name = ctx.spec.arg_str("collection");

        let mut filter = Document::new();
        filter.insert(key.to_string(), value.clone());
        let count = match target_name {
            Some(name) => ctx.backend.collection(name).await?.count(&filter).await?,
            None => ctx.collection.count(&filter).await?,
        };
        if count == 0 {
            return Err(HookFailure::Invalid(format!(
                "a value of \"{}\": {} must exist in {}.{}",
                ctx.field,
                value,
                target_name.unwrap_or("#"),
                key
            )));
        }
        Ok(None)
    }
}

/// `{type: hash, cost?: n, memory?: kib}`: replace a non-empty string with
/// its Argon2id hash. `cost` (alias `salt`) is the iteration count.
pub struct HashHook;

#[async_trait]
impl Hook for HashHook {
    async fn apply(&self, value: Option<&Value>, ctx: &HookContext<'_>) -> HookResult {
        let plain = match value {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(s)) if s.is_empty() => return Ok(None),
            Some(Value::String(s)) => s,
            Some(_) => return Err(HookFailure::Invalid("must be a string to be hashed".to_string())),
        };
        let params = hash_params(ctx.spec, ctx.config.hash_cost)?;
        Ok(Some(Value::String(hash_value(plain, params)?)))
    }
}

/// Argon2 parameters for a `hash` rule: `cost` (or `salt`) falling back to
/// `default_cost`, and `memory` in KiB.
pub(crate) fn hash_params(spec: &HookSpec, default_cost: u32) -> Result<Params, HookstoreError> {
    let cost = match spec.arg("cost").or_else(|| spec.arg("salt")) {
        Some(raw) => u32_arg("cost", raw)?,
        None => default_cost,
    };
    let memory = match spec.arg("memory") {
        Some(raw) => u32_arg("memory", raw)?,
        None => Params::DEFAULT_M_COST,
    };
    Params::new(memory, cost, Params::DEFAULT_P_COST, None)
        .map_err(|e| HookstoreError::Hash(format!("invalid hash parameters: {e}")))
}

fn u32_arg(name: &str, raw: &Value) -> Result<u32, HookstoreError> {
    raw.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| HookstoreError::Hash(format!("'{name}' must be an integer in u32 range, got {raw}")))
}

fn hash_value(plain: &str, params: Params) -> Result<String, HookstoreError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| HookstoreError::Hash(format!("failed to hash value: {e}")))
}

/// Check a plaintext against a value produced by the `hash` hook.
pub fn verify_hash(plain: &str, hashed: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hashed) else {
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

/// Accepts strftime (`%Y-%m-%d`) or dayjs-style tokens (`YYYY-MM-DD`).
fn strftime_format(format: &str) -> String {
    if format.contains('%') {
        return format.to_string();
    }
    format
        .replace("YYYY", "%Y")
        .replace("SSS", "%3f")
        .replace("MM", "%m")
        .replace("DD", "%d")
        .replace("HH", "%H")
        .replace("mm", "%M")
        .replace("ss", "%S")
}

fn now_formatted(ctx: &HookContext<'_>) -> HookResult {
    let format = strftime_format(
        ctx.spec
            .arg_str("format")
            .unwrap_or(ctx.config.timestamp_format.as_str()),
    );
    let mut out = String::new();
    write!(out, "{}", Local::now().format(&format))
        .map_err(|_| HookFailure::Invalid(format!("invalid timestamp format \"{format}\"")))?;
    Ok(Some(Value::String(out)))
}

/// `{type: timestamp_inserted, format?}`: on insert, fill a blank field with
/// the current local time. Never overwrites.
pub struct TimestampInsertedHook;

#[async_trait]
impl Hook for TimestampInsertedHook {
    async fn apply(&self, value: Option<&Value>, ctx: &HookContext<'_>) -> HookResult {
        if !is_blank(value) || !ctx.is_insert() {
            return Ok(None);
        }
        now_formatted(ctx)
    }
}

/// `{type: timestamp_updated, format?}`: fill a blank field with the current
/// local time, on insert and on update.
pub struct TimestampUpdatedHook;

#[async_trait]
impl Hook for TimestampUpdatedHook {
    async fn apply(&self, value: Option<&Value>, ctx: &HookContext<'_>) -> HookResult {
        if !is_blank(value) {
            return Ok(None);
        }
        now_formatted(ctx)
    }
}

/// `{type: array, items: {type: ..., ...}}`: run the `items` rule on every
/// element. Errors carry the element index; any failing element fails the
/// field.
pub struct ArrayHook;

#[async_trait]
impl Hook for ArrayHook {
    async fn apply(&self, value: Option<&Value>, ctx: &HookContext<'_>) -> HookResult {
        let items = match value {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(HookFailure::Invalid("must be an array".to_string())),
        };
        let Some(item_spec) = ctx.spec.items.as_deref() else {
            return Err(HookFailure::Invalid("array rule has no 'items'".to_string()));
        };

        let mut processed = items.clone();
        let mut errors = Vec::new();
        let mut changed = false;
        for (index, item) in items.iter().enumerate() {
            let item_ctx = ctx.item(index, item_spec);
            let mut slot = Some(item.clone());
            errors.extend(dispatch(&mut slot, &item_ctx).await?);
            if let Some(new_item) = slot {
                if new_item != *item {
                    processed[index] = new_item;
                    changed = true;
                }
            }
        }

        if !errors.is_empty() {
            return Err(HookFailure::Items(errors));
        }
        Ok(changed.then_some(Value::Array(processed)))
    }
}
