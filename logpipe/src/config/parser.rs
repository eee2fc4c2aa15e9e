//! Options shared by every parsing processor (regex, delimiter, JSON,
//! timestamp): what happens to the raw content on parse success or failure.

use serde_json::Value;

use super::{get_optional_bool_param, get_optional_string_param, param_warning_default};
use crate::context::PipelineContext;
use crate::event::LogEvent;

pub const LOG_RESERVED_KEY_FILE_OFFSET: &str = "__file_offset__";

#[derive(Clone, Debug, Default)]
pub struct CommonParserOptions {
    pub keeping_source_when_parse_fail: bool,
    pub keeping_source_when_parse_succeed: bool,
    pub renamed_source_key: String,
    pub coping_raw_log: bool,
}

impl CommonParserOptions {
    pub fn init(config: &Value, ctx: &PipelineContext, plugin_name: &str) -> Self {
        let mut opts = CommonParserOptions::default();

        let bool_with_default = |key: &str, target: &mut bool| {
            match get_optional_bool_param(config, key) {
                Ok(Some(v)) => *target = v,
                Ok(None) => {}
                Err(err) => param_warning_default(ctx, plugin_name, err, *target),
            };
        };
        bool_with_default(
            "KeepingSourceWhenParseFail",
            &mut opts.keeping_source_when_parse_fail,
        );
        bool_with_default(
            "KeepingSourceWhenParseSucceed",
            &mut opts.keeping_source_when_parse_succeed,
        );
        bool_with_default("CopingRawLog", &mut opts.coping_raw_log);

        match get_optional_string_param(config, "RenamedSourceKey") {
            Ok(Some(v)) => opts.renamed_source_key = v,
            Ok(None) => {}
            Err(err) => param_warning_default(ctx, plugin_name, err, ""),
        }

        opts
    }

    pub fn should_add_unmatch_log(&self, parse_success: bool) -> bool {
        !parse_success && self.keeping_source_when_parse_fail && self.coping_raw_log
    }

    pub fn should_add_renamed_source_log(&self, parse_success: bool) -> bool {
        (parse_success && self.keeping_source_when_parse_succeed)
            || (!parse_success && self.keeping_source_when_parse_fail)
    }

    /// Whether a failed event should be dropped outright: nothing useful is
    /// left in it once the raw content is not kept.
    pub fn should_erase_event(&self, parse_success: bool, source: &LogEvent) -> bool {
        if !parse_success && !self.keeping_source_when_parse_fail {
            if source.is_empty() {
                return true;
            }
            if source.content_len() == 1 {
                if let Some((key, _)) = source.contents().next() {
                    if key.as_str() == LOG_RESERVED_KEY_FILE_OFFSET {
                        return true;
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::StringView;
    use serde_json::json;

    fn ctx() -> PipelineContext {
        PipelineContext::builder().with_config_name("test").build()
    }

    #[test]
    fn defaults_are_all_off() {
        let opts = CommonParserOptions::init(&json!({}), &ctx(), "processor_parse_regex_native");
        assert!(!opts.keeping_source_when_parse_fail);
        assert!(!opts.coping_raw_log);
        assert!(opts.renamed_source_key.is_empty());
    }

    #[test]
    fn unmatch_log_requires_keep_and_copy() {
        let opts = CommonParserOptions::init(
            &json!({"KeepingSourceWhenParseFail": true, "CopingRawLog": true}),
            &ctx(),
            "processor_parse_regex_native",
        );
        assert!(opts.should_add_unmatch_log(false));
        assert!(!opts.should_add_unmatch_log(true));
    }

    #[test]
    fn erase_only_when_nothing_is_kept() {
        let opts = CommonParserOptions::init(&json!({}), &ctx(), "processor_parse_regex_native");
        let mut event = LogEvent::new(0);
        assert!(opts.should_erase_event(false, &event));

        event.add_content(
            StringView::from_static(LOG_RESERVED_KEY_FILE_OFFSET),
            StringView::from("123"),
        );
        assert!(opts.should_erase_event(false, &event));

        event.add_content(StringView::from("payload"), StringView::from("x"));
        assert!(!opts.should_erase_event(false, &event));
        assert!(!opts.should_erase_event(true, &event));
    }
}
