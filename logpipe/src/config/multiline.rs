//! Multiline log splitting configuration.

use regex::Regex;
use serde_json::Value;

use super::{get_optional_string_param, param_warning_default, param_warning_ignore};
use crate::context::PipelineContext;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MultilineMode {
    Json,
    #[default]
    Custom,
}

/// Validated multiline patterns; a pattern equal to `.*` counts as unset.
#[derive(Clone, Debug, Default)]
pub struct MultilineOptions {
    pub mode: MultilineMode,
    pub start_pattern: Option<Regex>,
    pub continue_pattern: Option<Regex>,
    pub end_pattern: Option<Regex>,
    is_multiline: bool,
}

impl MultilineOptions {
    pub fn init(config: &Value, ctx: &PipelineContext, plugin_name: &str) -> Self {
        let mut opts = MultilineOptions::default();

        match get_optional_string_param(config, "Multiline.Mode") {
            Ok(Some(mode)) if mode == "JSON" => {
                opts.mode = MultilineMode::Json;
                opts.is_multiline = true;
            }
            Ok(Some(mode)) if mode != "custom" => {
                param_warning_default(
                    ctx,
                    plugin_name,
                    "param Multiline.Mode is not valid",
                    "custom",
                );
            }
            Ok(_) => {}
            Err(err) => param_warning_default(ctx, plugin_name, err, "custom"),
        }

        if opts.mode == MultilineMode::Custom {
            opts.start_pattern = parse_pattern(config, "Multiline.StartPattern", ctx, plugin_name);
            opts.continue_pattern =
                parse_pattern(config, "Multiline.ContinuePattern", ctx, plugin_name);
            opts.end_pattern = parse_pattern(config, "Multiline.EndPattern", ctx, plugin_name);

            let has_start = opts.start_pattern.is_some();
            let has_end = opts.end_pattern.is_some();
            if !has_start && !has_end && opts.continue_pattern.is_some() {
                param_warning_ignore(
                    ctx,
                    plugin_name,
                    "param Multiline.StartPattern and EndPattern are empty but ContinuePattern is not",
                );
                opts.continue_pattern = None;
            } else if has_start || has_end {
                opts.is_multiline = true;
            }
        }

        opts
    }

    pub fn is_multiline(&self) -> bool {
        self.is_multiline
    }
}

fn parse_pattern(
    config: &Value,
    key: &str,
    ctx: &PipelineContext,
    plugin_name: &str,
) -> Option<Regex> {
    match get_optional_string_param(config, key) {
        Ok(Some(pattern)) if !pattern.is_empty() && pattern != ".*" => {
            match Regex::new(&pattern) {
                Ok(regex) => Some(regex),
                Err(_) => {
                    param_warning_ignore(ctx, plugin_name, format!("param {key} is not a valid regex"));
                    None
                }
            }
        }
        Ok(_) => None,
        Err(err) => {
            param_warning_ignore(ctx, plugin_name, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> PipelineContext {
        PipelineContext::builder().with_config_name("test").build()
    }

    #[test]
    fn json_mode_is_multiline() {
        let opts = MultilineOptions::init(&json!({"Mode": "JSON"}), &ctx(), "input_file");
        assert_eq!(opts.mode, MultilineMode::Json);
        assert!(opts.is_multiline());
    }

    #[test]
    fn custom_mode_needs_start_or_end() {
        let opts = MultilineOptions::init(
            &json!({"Mode": "custom", "ContinuePattern": "\\s+.*"}),
            &ctx(),
            "input_file",
        );
        assert!(!opts.is_multiline());
        assert!(opts.continue_pattern.is_none());

        let opts = MultilineOptions::init(
            &json!({"Mode": "custom", "StartPattern": "\\d{4}-\\d{2}-\\d{2}.*"}),
            &ctx(),
            "input_file",
        );
        assert!(opts.is_multiline());
        assert!(opts.start_pattern.is_some());
    }

    #[test]
    fn invalid_regex_is_ignored_with_alarm() {
        let context = ctx();
        let opts = MultilineOptions::init(
            &json!({"Mode": "custom", "StartPattern": "(unclosed"}),
            &context,
            "input_file",
        );
        assert!(opts.start_pattern.is_none());
        assert!(!opts.is_multiline());
        assert_eq!(context.alarm().len(), 1);
    }

    #[test]
    fn wildcard_pattern_counts_as_unset() {
        let opts = MultilineOptions::init(
            &json!({"Mode": "custom", "StartPattern": ".*"}),
            &ctx(),
            "input_file",
        );
        assert!(opts.start_pattern.is_none());
        assert!(!opts.is_multiline());
    }
}
