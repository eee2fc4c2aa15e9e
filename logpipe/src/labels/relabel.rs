//! Prometheus relabeling rules.
//!
//! A rule list runs left to right against a label set; `keep`/`drop` rules
//! short-circuit by returning `false`, which drops the event being
//! relabeled. Regexes are fully anchored, matching upstream Prometheus.

use md5::{Digest, Md5};
use regex::Regex;
use serde_json::Value;

use super::Labels;
use crate::config::{
    get_optional_string_list_param, get_optional_string_param, get_optional_uint_param,
    ParamError, ParamResult,
};
use crate::event::MetricEvent;
use crate::pipe_error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Replace,
    Keep,
    Drop,
    KeepEqual,
    DropEqual,
    HashMod,
    LabelMap,
    LabelDrop,
    LabelKeep,
    Lowercase,
    Uppercase,
}

impl Action {
    fn parse(s: &str) -> Option<Action> {
        Some(match s {
            "replace" => Action::Replace,
            "keep" => Action::Keep,
            "drop" => Action::Drop,
            "keepequal" => Action::KeepEqual,
            "dropequal" => Action::DropEqual,
            "hashmod" => Action::HashMod,
            "labelmap" => Action::LabelMap,
            "labeldrop" => Action::LabelDrop,
            "labelkeep" => Action::LabelKeep,
            "lowercase" => Action::Lowercase,
            "uppercase" => Action::Uppercase,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Replace => "replace",
            Action::Keep => "keep",
            Action::Drop => "drop",
            Action::KeepEqual => "keepequal",
            Action::DropEqual => "dropequal",
            Action::HashMod => "hashmod",
            Action::LabelMap => "labelmap",
            Action::LabelDrop => "labeldrop",
            Action::LabelKeep => "labelkeep",
            Action::Lowercase => "lowercase",
            Action::Uppercase => "uppercase",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RelabelConfig {
    pub source_labels: Vec<String>,
    pub separator: String,
    pub regex: Regex,
    pub modulus: u64,
    pub target_label: String,
    pub replacement: String,
    pub action: Action,
}

impl Default for RelabelConfig {
    fn default() -> Self {
        RelabelConfig {
            source_labels: Vec::new(),
            separator: ";".to_owned(),
            // Matches everything, with one capture for `$1` replacements.
            regex: anchored("(.*)").expect("static regex"),
            modulus: 0,
            target_label: String::new(),
            replacement: "$1".to_owned(),
            action: Action::Replace,
        }
    }
}

// Relabel regexes match the whole input.
fn anchored(expr: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{expr})$"))
}

impl RelabelConfig {
    pub fn init(config: &Value) -> ParamResult<Self> {
        let mut rc = RelabelConfig::default();

        if let Some(labels) = get_optional_string_list_param(config, "source_labels")? {
            rc.source_labels = labels;
        }
        if let Some(separator) = get_optional_string_param(config, "separator")? {
            rc.separator = separator;
        }
        if let Some(target) = get_optional_string_param(config, "target_label")? {
            rc.target_label = target;
        }
        if let Some(expr) = get_optional_string_param(config, "regex")? {
            rc.regex = anchored(&expr).map_err(|_| ParamError::TypeMismatch {
                key: "regex".to_owned(),
                expected: "regular expression",
            })?;
        }
        if let Some(replacement) = get_optional_string_param(config, "replacement")? {
            rc.replacement = replacement;
        }
        if let Some(action) = get_optional_string_param(config, "action")? {
            rc.action = Action::parse(&action).ok_or(ParamError::TypeMismatch {
                key: "action".to_owned(),
                expected: "relabel action",
            })?;
        }
        if let Some(modulus) = get_optional_uint_param(config, "modulus")? {
            rc.modulus = modulus as u64;
        }

        Ok(rc)
    }

    /// Apply one rule. Returns `false` when the event should be dropped.
    pub fn process(&self, labels: &mut Labels) -> bool {
        let values: Vec<&str> = self
            .source_labels
            .iter()
            .map(|name| labels.get(name))
            .collect();
        let val = values.join(&self.separator);

        match self.action {
            Action::Drop => {
                if self.regex.is_match(&val) {
                    return false;
                }
            }
            Action::Keep => {
                if !self.regex.is_match(&val) {
                    return false;
                }
            }
            Action::DropEqual => {
                if labels.get(&self.target_label) == val {
                    return false;
                }
            }
            Action::KeepEqual => {
                if labels.get(&self.target_label) != val {
                    return false;
                }
            }
            Action::Replace => {
                let Some(caps) = self.regex.captures(&val) else {
                    // No match, no replacement.
                    return true;
                };
                let mut target = String::new();
                caps.expand(&self.target_label, &mut target);
                let mut res = String::new();
                caps.expand(&self.replacement, &mut res);
                if res.is_empty() {
                    labels.del(&target);
                } else {
                    labels.set(target, res);
                }
            }
            Action::Lowercase => {
                labels.set(self.target_label.clone(), val.to_lowercase());
            }
            Action::Uppercase => {
                labels.set(self.target_label.clone(), val.to_uppercase());
            }
            Action::HashMod => {
                if self.modulus == 0 {
                    pipe_error!(name: "Relabel.InvalidModulus", action = self.action.as_str());
                    return true;
                }
                let digest = Md5::digest(val.as_bytes());
                // Only the last 8 bytes of the hash, for parity with the
                // historical prometheus behavior.
                let mut tail = [0u8; 8];
                tail.copy_from_slice(&digest[8..16]);
                let hashed = u64::from_be_bytes(tail) % self.modulus;
                labels.set(self.target_label.clone(), hashed.to_string());
            }
            Action::LabelMap => {
                let mut renames = Vec::new();
                labels.range(|name, value| {
                    if let Some(caps) = self.regex.captures(name) {
                        let mut renamed = String::new();
                        caps.expand(&self.replacement, &mut renamed);
                        renames.push((renamed, value.to_owned()));
                    }
                });
                for (name, value) in renames {
                    labels.set(name, value);
                }
            }
            Action::LabelDrop => {
                let mut to_del = Vec::new();
                labels.range(|name, _| {
                    if self.regex.is_match(name) {
                        to_del.push(name.to_owned());
                    }
                });
                for name in to_del {
                    labels.del(&name);
                }
            }
            Action::LabelKeep => {
                let mut to_del = Vec::new();
                labels.range(|name, _| {
                    if !self.regex.is_match(name) {
                        to_del.push(name.to_owned());
                    }
                });
                for name in to_del {
                    labels.del(&name);
                }
            }
        }
        true
    }
}

/// An ordered rule list.
#[derive(Clone, Debug, Default)]
pub struct RelabelConfigList {
    configs: Vec<RelabelConfig>,
}

impl RelabelConfigList {
    pub fn init(configs: &Value) -> ParamResult<Self> {
        let Some(items) = configs.as_array() else {
            return Err(ParamError::TypeMismatch {
                key: "relabel_configs".to_owned(),
                expected: "array",
            });
        };
        let mut list = Vec::with_capacity(items.len());
        for item in items {
            list.push(RelabelConfig::init(item)?);
        }
        Ok(RelabelConfigList { configs: list })
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn process(&self, labels: &mut Labels) -> bool {
        for config in &self.configs {
            if !config.process(labels) {
                return false;
            }
        }
        true
    }

    /// Relabel a metric event's tag set in place. Returns `false` when the
    /// event should be dropped.
    pub fn process_event(&self, event: &mut MetricEvent) -> bool {
        let mut labels: Labels = event
            .tags()
            .map(|(k, v)| (k.as_str().to_owned(), v.as_str().to_owned()))
            .collect();
        if !self.process(&mut labels) {
            return false;
        }
        let old_keys: Vec<String> = event.tags().map(|(k, _)| k.as_str().to_owned()).collect();
        for key in old_keys {
            if !labels.contains(&key) {
                event.del_tag(&key);
            }
        }
        for (name, value) in labels.iter() {
            let current = event.tag(name).map(|v| v.as_str());
            if current != Some(value) {
                event.set_tag(name.into(), value.into());
            }
        }
        true
    }
}
