//! Typed extraction of plugin parameters from JSON configuration.
//!
//! Components receive their configuration as a [`serde_json::Value`] and
//! pull typed values out of it. A failed extraction is handled with one of
//! three severities, applied uniformly across the agent:
//!
//! * **error** — init aborts ([`init_error`]);
//! * **warning + default** — a typed default is substituted
//!   ([`param_warning_default`]);
//! * **warning + ignore** — the target is left unchanged
//!   ([`param_warning_ignore`]).
//!
//! All three emit a structured log line and a config alarm carrying
//! `(project, logstore, region, module, config_name, message)`.

mod file;
mod multiline;
mod parser;

pub use file::{FileDiscoveryOptions, FileEncoding, FileReaderOptions};
pub use multiline::{MultilineMode, MultilineOptions};
pub use parser::{CommonParserOptions, LOG_RESERVED_KEY_FILE_OFFSET};

use std::fmt::Display;

use serde_json::Value;
use thiserror::Error;

use crate::alarm::{Alarm, AlarmCategory};
use crate::context::PipelineContext;
use crate::{pipe_error, pipe_warn};

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("mandatory param {0} is missing")]
    Missing(String),
    #[error("mandatory string param {0} is empty")]
    Empty(String),
    #[error("param {key} is not of type {expected}")]
    TypeMismatch { key: String, expected: &'static str },
}

/// Init failure surfaced to the pipeline loader.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid config: {0}")]
    InvalidParam(String),
}

pub type ParamResult<T> = Result<T, ParamError>;

// Keys are display paths ("Batch.SendIntervalSecs"); lookup uses the last
// segment against the object actually passed in.
fn lookup<'a>(config: &'a Value, key: &str) -> Option<&'a Value> {
    let field = key.rsplit('.').next().unwrap_or(key);
    config.get(field)
}

fn type_mismatch(key: &str, expected: &'static str) -> ParamError {
    ParamError::TypeMismatch {
        key: key.to_owned(),
        expected,
    }
}

pub fn get_optional_string_param(config: &Value, key: &str) -> ParamResult<Option<String>> {
    match lookup(config, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(type_mismatch(key, "string")),
    }
}

pub fn get_mandatory_string_param(config: &Value, key: &str) -> ParamResult<String> {
    match get_optional_string_param(config, key)? {
        Some(s) if s.is_empty() => Err(ParamError::Empty(key.to_owned())),
        Some(s) => Ok(s),
        None => Err(ParamError::Missing(key.to_owned())),
    }
}

pub fn get_optional_bool_param(config: &Value, key: &str) -> ParamResult<Option<bool>> {
    match lookup(config, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(type_mismatch(key, "bool")),
    }
}

pub fn get_optional_uint_param(config: &Value, key: &str) -> ParamResult<Option<u32>> {
    match lookup(config, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(v) if v <= u32::MAX as u64 => Ok(Some(v as u32)),
            _ => Err(type_mismatch(key, "uint")),
        },
        Some(_) => Err(type_mismatch(key, "uint")),
    }
}

pub fn get_mandatory_uint_param(config: &Value, key: &str) -> ParamResult<u32> {
    get_optional_uint_param(config, key)?.ok_or_else(|| ParamError::Missing(key.to_owned()))
}

pub fn get_optional_int_param(config: &Value, key: &str) -> ParamResult<Option<i64>> {
    match lookup(config, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| type_mismatch(key, "int")),
        Some(_) => Err(type_mismatch(key, "int")),
    }
}

pub fn get_optional_string_list_param(config: &Value, key: &str) -> ParamResult<Option<Vec<String>>> {
    match lookup(config, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    _ => return Err(type_mismatch(key, "string list")),
                }
            }
            Ok(Some(out))
        }
        Some(_) => Err(type_mismatch(key, "string list")),
    }
}

fn config_alarm(ctx: &PipelineContext, module: &str, message: String) {
    ctx.alarm().send_alarm(Alarm {
        category: AlarmCategory::Config,
        message,
        project: ctx.project().to_owned(),
        logstore: ctx.logstore().to_owned(),
        region: ctx.region().to_owned(),
        module: module.to_owned(),
        config_name: ctx.config_name().to_owned(),
    });
}

/// Severity **error**: log, alarm and hand back an [`InitError`] for the
/// caller to abort with.
pub fn init_error(ctx: &PipelineContext, module: &str, err: impl Display) -> InitError {
    let msg = err.to_string();
    pipe_error!(
        name: "Config.ParseFailed",
        module = module,
        config = ctx.config_name(),
        error = msg.as_str(),
    );
    config_alarm(ctx, module, format!("{msg}: abort"));
    InitError::InvalidParam(msg)
}

/// Severity **warning + default**: log, alarm, caller substitutes `default`.
pub fn param_warning_default(
    ctx: &PipelineContext,
    module: &str,
    err: impl Display,
    default: impl Display,
) {
    let msg = err.to_string();
    pipe_warn!(
        name: "Config.UseDefaultValue",
        module = module,
        config = ctx.config_name(),
        error = msg.as_str(),
        default = default.to_string(),
    );
    config_alarm(
        ctx,
        module,
        format!("{msg}: use default value instead, default value: {default}"),
    );
}

/// Severity **warning + ignore**: log, alarm, caller leaves the target as is.
pub fn param_warning_ignore(ctx: &PipelineContext, module: &str, err: impl Display) {
    let msg = err.to_string();
    pipe_warn!(
        name: "Config.IgnoreParam",
        module = module,
        config = ctx.config_name(),
        error = msg.as_str(),
    );
    config_alarm(ctx, module, format!("{msg}: ignore param"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_params() {
        let config = json!({"Project": "demo", "Empty": "", "Wrong": 3});
        assert_eq!(
            get_mandatory_string_param(&config, "Project").unwrap(),
            "demo"
        );
        assert!(matches!(
            get_mandatory_string_param(&config, "Empty"),
            Err(ParamError::Empty(_))
        ));
        assert!(matches!(
            get_mandatory_string_param(&config, "Missing"),
            Err(ParamError::Missing(_))
        ));
        assert!(matches!(
            get_optional_string_param(&config, "Wrong"),
            Err(ParamError::TypeMismatch { .. })
        ));
        assert_eq!(get_optional_string_param(&config, "Missing").unwrap(), None);
    }

    #[test]
    fn numeric_params() {
        let config = json!({"MaxSendRate": -1, "SendIntervalSecs": 3, "Huge": 1u64 << 40});
        assert_eq!(get_optional_int_param(&config, "MaxSendRate").unwrap(), Some(-1));
        assert_eq!(
            get_optional_uint_param(&config, "SendIntervalSecs").unwrap(),
            Some(3)
        );
        assert!(get_optional_uint_param(&config, "MaxSendRate").is_err());
        assert!(get_optional_uint_param(&config, "Huge").is_err());
    }

    #[test]
    fn dotted_keys_use_last_segment() {
        let batch = json!({"SendIntervalSecs": 5});
        assert_eq!(
            get_optional_uint_param(&batch, "Batch.SendIntervalSecs").unwrap(),
            Some(5)
        );
    }

    #[test]
    fn list_params() {
        let config = json!({"ShardHashKeys": ["a", "b"], "Bad": ["a", 1]});
        assert_eq!(
            get_optional_string_list_param(&config, "ShardHashKeys").unwrap(),
            Some(vec!["a".to_owned(), "b".to_owned()])
        );
        assert!(get_optional_string_list_param(&config, "Bad").is_err());
    }

    #[test]
    fn severities_emit_alarms() {
        let ctx = PipelineContext::builder()
            .with_config_name("c")
            .with_project("p")
            .build();
        let _ = init_error(&ctx, "flusher_sls", "mandatory param Project is missing");
        param_warning_default(&ctx, "flusher_sls", "bad Region", "cn-test");
        param_warning_ignore(&ctx, "flusher_sls", "bad Aliuid");
        assert_eq!(ctx.alarm().len(), 3);
    }
}
