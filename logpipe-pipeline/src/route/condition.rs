//! Match conditions deciding whether a flusher receives a group.

use logpipe::config::{get_mandatory_string_param, init_error, InitError};
use logpipe::event::EventType;
use logpipe::{EventGroup, PipelineContext};
use serde_json::Value;

const NO_MODULE: &str = "router";

#[derive(Clone, Debug)]
pub struct EventTypeCondition {
    event_type: EventType,
}

impl EventTypeCondition {
    fn init(config: &Value, ctx: &PipelineContext) -> Result<Self, InitError> {
        let value = get_mandatory_string_param(config, "Match.Value")
            .map_err(|err| init_error(ctx, NO_MODULE, err))?;
        let event_type = match value.as_str() {
            "log" => EventType::Log,
            "metric" => EventType::Metric,
            "trace" => EventType::Span,
            _ => return Err(init_error(ctx, NO_MODULE, "param Match.Value is not valid")),
        };
        Ok(EventTypeCondition { event_type })
    }

    fn check(&self, group: &EventGroup) -> bool {
        match group.events().first() {
            Some(event) => event.event_type() == self.event_type,
            None => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TagCondition {
    key: String,
    value: String,
}

impl TagCondition {
    fn init(config: &Value, ctx: &PipelineContext) -> Result<Self, InitError> {
        let key = get_mandatory_string_param(config, "Match.Key")
            .map_err(|err| init_error(ctx, NO_MODULE, err))?;
        let value = get_mandatory_string_param(config, "Match.Value")
            .map_err(|err| init_error(ctx, NO_MODULE, err))?;
        Ok(TagCondition { key, value })
    }

    fn check(&self, group: &EventGroup) -> bool {
        group
            .tag(&self.key)
            .map(|v| v.as_str() == self.value)
            .unwrap_or(false)
    }
}

/// A flusher's `Match` block.
#[derive(Clone, Debug)]
pub enum Condition {
    EventType(EventTypeCondition),
    Tag(TagCondition),
}

impl Condition {
    pub fn init(config: &Value, ctx: &PipelineContext) -> Result<Self, InitError> {
        if !config.is_object() {
            return Err(init_error(ctx, NO_MODULE, "param Match is not of type object"));
        }
        let condition_type = get_mandatory_string_param(config, "Type")
            .map_err(|err| init_error(ctx, NO_MODULE, err))?;
        match condition_type.as_str() {
            "event_type" => Ok(Condition::EventType(EventTypeCondition::init(config, ctx)?)),
            "tag" => Ok(Condition::Tag(TagCondition::init(config, ctx)?)),
            _ => Err(init_error(ctx, NO_MODULE, "param Match.Type is not valid")),
        }
    }

    pub fn check(&self, group: &EventGroup) -> bool {
        match self {
            Condition::EventType(c) => c.check(group),
            Condition::Tag(c) => c.check(group),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe::event::LogEvent;
    use logpipe::StringView;
    use serde_json::json;

    fn ctx() -> PipelineContext {
        PipelineContext::builder().with_config_name("test").build()
    }

    fn log_group() -> EventGroup {
        let mut group = EventGroup::default();
        group.push_event(LogEvent::new(0));
        group
    }

    #[test]
    fn event_type_condition_checks_first_event() {
        let condition =
            Condition::init(&json!({"Type": "event_type", "Value": "log"}), &ctx()).unwrap();
        assert!(condition.check(&log_group()));
        assert!(!condition.check(&EventGroup::default()));

        let condition =
            Condition::init(&json!({"Type": "event_type", "Value": "metric"}), &ctx()).unwrap();
        assert!(!condition.check(&log_group()));
    }

    #[test]
    fn tag_condition_compares_group_tag() {
        let condition = Condition::init(
            &json!({"Type": "tag", "Key": "env", "Value": "prod"}),
            &ctx(),
        )
        .unwrap();
        let mut group = log_group();
        assert!(!condition.check(&group));
        group.set_tag(StringView::from("env"), StringView::from("prod"));
        assert!(condition.check(&group));
    }

    #[test]
    fn invalid_conditions_abort_init() {
        assert!(Condition::init(&json!("log"), &ctx()).is_err());
        assert!(Condition::init(&json!({"Type": "unknown"}), &ctx()).is_err());
        assert!(Condition::init(&json!({"Type": "event_type", "Value": "bogus"}), &ctx()).is_err());
    }
}
