//! Local-file flusher: NDJSON into a size-rotated file, bypassing the
//! sender queue entirely.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use logpipe::config::{
    get_mandatory_string_param, get_optional_uint_param, init_error, param_warning_default,
    InitError,
};
use logpipe::{pipe_error, pipe_warn, EventGroup, PipelineContext};
use logpipe_pipeline::batch::{Batcher, DefaultFlushStrategyOptions, EventBatchStatus};
use logpipe_pipeline::error::FlushResult;
use logpipe_pipeline::flusher::Flusher;
use serde_json::Value;

use crate::runtime::AgentRuntime;
use crate::serializer::{JsonEventGroupSerializer, Serializer};

const DEFAULT_MAX_FILE_SIZE: u32 = 10 * 1024 * 1024;
const DEFAULT_MAX_FILES: u32 = 10;

const BATCH_MAX_SIZE_BYTES: u32 = 10 * 1024 * 1024;
const BATCH_MIN_SIZE_BYTES: u32 = 512 * 1024;
const BATCH_MIN_CNT: u32 = 4000;
const BATCH_TIMEOUT_SECS: u32 = 1;

/// Size-based rotation: `app.log`, `app.log.1`, ... `app.log.N`, oldest
/// dropped.
struct RotatingFileWriter {
    path: PathBuf,
    max_file_size: u64,
    max_files: u32,
    state: Mutex<Option<(File, u64)>>,
}

impl RotatingFileWriter {
    fn new(path: PathBuf, max_file_size: u64, max_files: u32) -> Self {
        RotatingFileWriter {
            path,
            max_file_size,
            max_files,
            state: Mutex::new(None),
        }
    }

    fn rotated_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn open(&self) -> std::io::Result<(File, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    fn rotate(&self) -> std::io::Result<(File, u64)> {
        let _ = std::fs::remove_file(self.rotated_path(self.max_files));
        for index in (1..self.max_files).rev() {
            let from = self.rotated_path(index);
            if from.exists() {
                let _ = std::fs::rename(&from, self.rotated_path(index + 1));
            }
        }
        std::fs::rename(&self.path, self.rotated_path(1))?;
        self.open()
    }

    fn write_line(&self, data: &[u8]) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_none() {
            *state = Some(self.open()?);
        }
        if let Some((file, size)) = state.as_mut() {
            if *size + data.len() as u64 > self.max_file_size && *size > 0 {
                let (new_file, new_size) = self.rotate()?;
                *file = new_file;
                *size = new_size;
            }
            file.write_all(data)?;
            *size += data.len() as u64;
        }
        Ok(())
    }
}

/// Writes serialized groups to a rotating local file, mainly for debugging
/// pipelines and air-gapped capture.
pub struct FlusherLocalFile {
    ctx: PipelineContext,
    node_id: usize,
    file_name: String,
    batcher: Batcher<EventBatchStatus>,
    serializer: JsonEventGroupSerializer,
    writer: RotatingFileWriter,
}

impl FlusherLocalFile {
    pub const NAME: &'static str = "flusher_local_file";

    pub fn new(
        config: &Value,
        ctx: PipelineContext,
        node_id: usize,
        runtime: &AgentRuntime,
    ) -> Result<Arc<Self>, InitError> {
        let file_name = get_mandatory_string_param(config, "FileName")
            .map_err(|err| init_error(&ctx, Self::NAME, err))?;

        let max_file_size = match get_optional_uint_param(config, "MaxFileSize") {
            Ok(v) => v.unwrap_or(DEFAULT_MAX_FILE_SIZE),
            Err(err) => {
                param_warning_default(&ctx, Self::NAME, err, DEFAULT_MAX_FILE_SIZE);
                DEFAULT_MAX_FILE_SIZE
            }
        };
        let max_files = match get_optional_uint_param(config, "MaxFiles") {
            Ok(v) => v.unwrap_or(DEFAULT_MAX_FILES),
            Err(err) => {
                param_warning_default(&ctx, Self::NAME, err, DEFAULT_MAX_FILES);
                DEFAULT_MAX_FILES
            }
        };

        let strategy = DefaultFlushStrategyOptions {
            max_size_bytes: BATCH_MAX_SIZE_BYTES,
            min_size_bytes: BATCH_MIN_SIZE_BYTES,
            min_cnt: BATCH_MIN_CNT,
            timeout_secs: BATCH_TIMEOUT_SECS,
        };
        let timeout_manager = runtime.timeout_manager().clone();

        Ok(Arc::new_cyclic(|weak: &Weak<FlusherLocalFile>| {
            let flusher_weak: Weak<dyn Flusher> = weak.clone();
            let batcher = Batcher::init(
                &Value::Null,
                &ctx,
                Self::NAME,
                node_id,
                flusher_weak,
                strategy,
                false,
                timeout_manager,
            );
            FlusherLocalFile {
                serializer: JsonEventGroupSerializer::new(&ctx, node_id),
                writer: RotatingFileWriter::new(
                    PathBuf::from(&file_name),
                    max_file_size as u64,
                    max_files,
                ),
                ctx,
                node_id,
                file_name,
                batcher,
            }
        }))
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    fn serialize_and_write(
        &self,
        lists: Vec<logpipe_pipeline::batch::BatchedEventsList>,
    ) -> FlushResult {
        for list in lists {
            for batch in list {
                let serialized = match self.serializer.serialize(batch) {
                    Ok(data) => data,
                    Err(err) => {
                        pipe_warn!(
                            name: "FlusherLocalFile.SerializeFailed",
                            error = err.to_string(),
                        );
                        continue;
                    }
                };
                if let Err(err) = self.writer.write_line(&serialized) {
                    pipe_error!(
                        name: "FlusherLocalFile.WriteFailed",
                        file = self.file_name.as_str(),
                        error = err.to_string(),
                    );
                }
            }
        }
        Ok(())
    }
}

impl Flusher for FlusherLocalFile {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    fn node_id(&self) -> usize {
        self.node_id
    }

    fn send(&self, group: EventGroup) -> FlushResult {
        let mut lists = Vec::new();
        self.batcher.add(group, &mut lists);
        self.serialize_and_write(lists)
    }

    fn flush(&self, key: u64) -> FlushResult {
        let mut list = Vec::new();
        self.batcher.flush_queue(key, &mut list);
        self.serialize_and_write(vec![list])
    }

    fn flush_all(&self) -> FlushResult {
        let mut lists = Vec::new();
        self.batcher.flush_all(&mut lists);
        self.serialize_and_write(lists)
    }
}

impl fmt::Debug for FlusherLocalFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlusherLocalFile")
            .field("file_name", &self.file_name)
            .finish()
    }
}
