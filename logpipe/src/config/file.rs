//! Typed options for the file input.
//!
//! Discovery and tailing themselves are external collaborators; the agent
//! core only validates and carries their configuration.

use serde_json::Value;

use super::{
    get_optional_bool_param, get_optional_int_param, get_optional_string_list_param,
    get_optional_string_param, get_optional_uint_param, init_error, param_warning_default,
    param_warning_ignore, InitError, ParamError,
};
use crate::context::PipelineContext;

const DEFAULT_TAIL_SIZE_KB: u32 = 1024;
const MAX_TAIL_SIZE_KB: u32 = 100 * 1024; // 100 MiB
const DEFAULT_FLUSH_TIMEOUT_SECS: u32 = 5;
const DEFAULT_READ_DELAY_ALERT_BYTES: u32 = 200 * 1024 * 1024;
const DEFAULT_CLOSE_UNUSED_READER_SECS: u32 = 60;
const DEFAULT_ROTATOR_QUEUE_SIZE: u32 = 20;

/// Which files a pipeline watches.
#[derive(Clone, Debug, Default)]
pub struct FileDiscoveryOptions {
    pub base_path: String,
    pub file_pattern: String,
    /// Set when the configured parent path ended with `/**`.
    pub recursive_search: bool,
    pub max_dir_search_depth: i64,
    pub preserved_dir_depth: i64,
    pub exclude_file_paths: Vec<String>,
    pub exclude_files: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub allowing_collecting_files_in_root_dir: bool,
    pub allowing_included_by_multi_configs: bool,
}

impl FileDiscoveryOptions {
    pub fn init(
        config: &Value,
        ctx: &PipelineContext,
        plugin_name: &str,
    ) -> Result<Self, InitError> {
        let mut opts = FileDiscoveryOptions::default();

        let file_paths = match get_optional_string_list_param(config, "FilePaths") {
            Ok(Some(paths)) => paths,
            Ok(None) => {
                return Err(init_error(
                    ctx,
                    plugin_name,
                    ParamError::Missing("FilePaths".into()),
                ))
            }
            Err(err) => return Err(init_error(ctx, plugin_name, err)),
        };
        if file_paths.len() != 1 {
            return Err(init_error(
                ctx,
                plugin_name,
                "param FilePaths has more than 1 element",
            ));
        }
        let path = &file_paths[0];
        let (base, pattern) = match path.rsplit_once('/') {
            Some((base, pattern)) if !base.is_empty() && !pattern.is_empty() => {
                (base.to_owned(), pattern.to_owned())
            }
            _ => return Err(init_error(ctx, plugin_name, "param FilePaths[0] is invalid")),
        };
        opts.file_pattern = pattern;
        // A parent path ending in `/**` turns on recursive search, and only
        // then is MaxDirSearchDepth meaningful.
        if let Some(stripped) = base.strip_suffix("/**") {
            opts.recursive_search = true;
            opts.base_path = if stripped.is_empty() {
                "/".to_owned()
            } else {
                stripped.to_owned()
            };
            opts.max_dir_search_depth = match get_optional_int_param(config, "MaxDirSearchDepth") {
                Ok(v) => v.unwrap_or(0),
                Err(err) => {
                    param_warning_default(ctx, plugin_name, err, 0);
                    0
                }
            };
        } else {
            opts.base_path = base;
        }

        opts.preserved_dir_depth = match get_optional_int_param(config, "PreservedDirDepth") {
            Ok(v) => v.unwrap_or(-1),
            Err(err) => {
                param_warning_default(ctx, plugin_name, err, -1);
                -1
            }
        };

        match get_optional_string_list_param(config, "ExcludeFilePaths") {
            Ok(Some(paths)) => {
                for (i, p) in paths.into_iter().enumerate() {
                    if !p.starts_with('/') {
                        param_warning_ignore(
                            ctx,
                            plugin_name,
                            format!("ExcludeFilePaths[{i}] is not absolute"),
                        );
                        continue;
                    }
                    opts.exclude_file_paths.push(p);
                }
            }
            Ok(None) => {}
            Err(err) => param_warning_ignore(ctx, plugin_name, err),
        }

        match get_optional_string_list_param(config, "ExcludeFiles") {
            Ok(Some(files)) => {
                for (i, f) in files.into_iter().enumerate() {
                    if f.contains('/') {
                        param_warning_ignore(
                            ctx,
                            plugin_name,
                            format!("ExcludeFiles[{i}] contains path separator"),
                        );
                        continue;
                    }
                    opts.exclude_files.push(f);
                }
            }
            Ok(None) => {}
            Err(err) => param_warning_ignore(ctx, plugin_name, err),
        }

        match get_optional_string_list_param(config, "ExcludeDirs") {
            Ok(Some(dirs)) => {
                for (i, d) in dirs.into_iter().enumerate() {
                    if !d.starts_with('/') {
                        param_warning_ignore(
                            ctx,
                            plugin_name,
                            format!("ExcludeDirs[{i}] is not absolute"),
                        );
                        continue;
                    }
                    opts.exclude_dirs.push(d);
                }
            }
            Ok(None) => {}
            Err(err) => param_warning_ignore(ctx, plugin_name, err),
        }

        opts.allowing_collecting_files_in_root_dir =
            match get_optional_bool_param(config, "AllowingCollectingFilesInRootDir") {
                Ok(v) => v.unwrap_or(false),
                Err(err) => {
                    param_warning_default(ctx, plugin_name, err, false);
                    false
                }
            };
        opts.allowing_included_by_multi_configs =
            match get_optional_bool_param(config, "AllowingIncludedByMultiConfigs") {
                Ok(v) => v.unwrap_or(false),
                Err(err) => {
                    param_warning_default(ctx, plugin_name, err, false);
                    false
                }
            };

        Ok(opts)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FileEncoding {
    #[default]
    Utf8,
    Gbk,
}

/// How matched files are read.
#[derive(Clone, Debug)]
pub struct FileReaderOptions {
    pub file_encoding: FileEncoding,
    pub tailing_all_matched_files: bool,
    pub tail_size_kb: u32,
    pub flush_timeout_secs: u32,
    pub read_delay_skip_threshold_bytes: u32,
    pub read_delay_alert_threshold_bytes: u32,
    pub close_unused_reader_interval_sec: u32,
    pub rotator_queue_size: u32,
    pub appending_log_position_meta: bool,
}

impl Default for FileReaderOptions {
    fn default() -> Self {
        FileReaderOptions {
            file_encoding: FileEncoding::Utf8,
            tailing_all_matched_files: false,
            tail_size_kb: DEFAULT_TAIL_SIZE_KB,
            flush_timeout_secs: DEFAULT_FLUSH_TIMEOUT_SECS,
            read_delay_skip_threshold_bytes: 0,
            read_delay_alert_threshold_bytes: DEFAULT_READ_DELAY_ALERT_BYTES,
            close_unused_reader_interval_sec: DEFAULT_CLOSE_UNUSED_READER_SECS,
            rotator_queue_size: DEFAULT_ROTATOR_QUEUE_SIZE,
            appending_log_position_meta: false,
        }
    }
}

impl FileReaderOptions {
    pub fn init(
        config: &Value,
        ctx: &PipelineContext,
        plugin_name: &str,
    ) -> Result<Self, InitError> {
        let mut opts = FileReaderOptions::default();

        match get_optional_string_param(config, "FileEncoding") {
            Ok(None) => {}
            Ok(Some(encoding)) => match encoding.as_str() {
                "utf8" => opts.file_encoding = FileEncoding::Utf8,
                "gbk" => opts.file_encoding = FileEncoding::Gbk,
                _ => {
                    return Err(init_error(ctx, plugin_name, "param FileEncoding is not valid"))
                }
            },
            Err(err) => return Err(init_error(ctx, plugin_name, err)),
        }

        opts.tailing_all_matched_files =
            match get_optional_bool_param(config, "TailingAllMatchedFiles") {
                Ok(v) => v.unwrap_or(false),
                Err(err) => {
                    param_warning_default(ctx, plugin_name, err, false);
                    false
                }
            };

        match get_optional_uint_param(config, "TailSizeKB") {
            Ok(None) => {}
            Ok(Some(v)) if v > MAX_TAIL_SIZE_KB => {
                param_warning_default(
                    ctx,
                    plugin_name,
                    format!("param TailSizeKB is larger than {MAX_TAIL_SIZE_KB}"),
                    DEFAULT_TAIL_SIZE_KB,
                );
            }
            Ok(Some(v)) => opts.tail_size_kb = v,
            Err(err) => param_warning_default(ctx, plugin_name, err, DEFAULT_TAIL_SIZE_KB),
        }

        let uint_with_default = |key: &str, target: &mut u32| {
            match get_optional_uint_param(config, key) {
                Ok(Some(v)) => *target = v,
                Ok(None) => {}
                Err(err) => param_warning_default(ctx, plugin_name, err, *target),
            };
        };
        uint_with_default("FlushTimeoutSecs", &mut opts.flush_timeout_secs);
        uint_with_default(
            "ReadDelaySkipThresholdBytes",
            &mut opts.read_delay_skip_threshold_bytes,
        );
        uint_with_default(
            "ReadDelayAlertThresholdBytes",
            &mut opts.read_delay_alert_threshold_bytes,
        );
        uint_with_default(
            "CloseUnusedReaderIntervalSec",
            &mut opts.close_unused_reader_interval_sec,
        );
        uint_with_default("RotatorQueueSize", &mut opts.rotator_queue_size);

        opts.appending_log_position_meta =
            match get_optional_bool_param(config, "AppendingLogPositionMeta") {
                Ok(v) => v.unwrap_or(false),
                Err(err) => {
                    param_warning_default(ctx, plugin_name, err, false);
                    false
                }
            };

        Ok(opts)
    }

    pub fn tail_size_bytes(&self) -> u64 {
        self.tail_size_kb as u64 * 1024
    }
}
