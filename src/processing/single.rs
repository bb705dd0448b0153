//! Processors that turn one source file into one derived file.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::processor::{FileProcessor, ProcessingContext};
use crate::artifact::Artifact;
use crate::errors::ProcessingError;
use crate::mimetype::basename;
use crate::model::{NewProcessedFile, ProcessedFile};
use crate::storage::processed_key;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A single external transformation step.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Name of the file this converter produces from `source_name`.
    fn output_name(&self, source_name: &str) -> String;

    /// Convert `input`, writing the result into `outdir`. Returns the output path.
    async fn convert(&self, input: &Path, outdir: &Path) -> Result<PathBuf>;
}

fn replace_extension(source_name: &str, extension: Option<&str>) -> String {
    match extension {
        None => source_name.to_string(),
        Some(ext) => {
            let stem = source_name
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .filter(|stem| !stem.is_empty())
                .unwrap_or(source_name);
            format!("{}.{}", stem, ext.trim_start_matches('.'))
        }
    }
}

fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

/// Runs a shell command such as a headless office suite.
///
/// The template may reference `{input}`, `{outdir}` and `{output}`; each is
/// replaced with a quoted path. The command must leave its result at
/// `{output}`, which is `{outdir}/<source stem>.<output_extension>`.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    command: String,
    output_extension: String,
    timeout: Duration,
}

impl CommandConverter {
    pub fn new(command: impl Into<String>, output_extension: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            output_extension: output_extension.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Converter for CommandConverter {
    fn output_name(&self, source_name: &str) -> String {
        replace_extension(source_name, Some(&self.output_extension))
    }

    async fn convert(&self, input: &Path, outdir: &Path) -> Result<PathBuf> {
        let source_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = outdir.join(self.output_name(&source_name));
        let command = self
            .command
            .replace("{input}", &shell_quote(input))
            .replace("{outdir}", &shell_quote(outdir))
            .replace("{output}", &shell_quote(&output));

        debug!(command = %command, "Running conversion command");
        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(outdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn conversion command: {}", self.command))?;

        let result = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for conversion command")?,
            Err(_) => bail!("Conversion command timed out after {:?}", self.timeout),
        };

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            bail!(
                "Conversion command exited with {}: {}",
                result.status,
                stderr.trim()
            );
        }
        if !output.is_file() {
            bail!("Conversion command did not produce {}", output.display());
        }
        Ok(output)
    }
}

/// Applies ordered regex substitutions to UTF-8 text.
#[derive(Debug, Clone)]
pub struct SubstitutionConverter {
    rules: Vec<(Regex, String)>,
    output_extension: Option<String>,
}

impl SubstitutionConverter {
    pub fn new(rules: Vec<(Regex, String)>, output_extension: Option<String>) -> Self {
        Self {
            rules,
            output_extension,
        }
    }

    /// Parse rules from a JSON array of `[pattern, replacement]` pairs.
    pub fn from_json(raw: &str, output_extension: Option<String>) -> Result<Self> {
        let pairs: Vec<(String, String)> =
            serde_json::from_str(raw).context("substitutions must be a JSON array of [pattern, replacement] pairs")?;
        let mut rules = Vec::with_capacity(pairs.len());
        for (pattern, replacement) in pairs {
            let re = Regex::new(&pattern)
                .with_context(|| format!("Invalid substitution pattern '{}'", pattern))?;
            rules.push((re, replacement));
        }
        Ok(Self::new(rules, output_extension))
    }

    pub fn apply(&self, text: &str) -> String {
        self.rules
            .iter()
            .fold(text.to_string(), |acc, (re, replacement)| {
                re.replace_all(&acc, replacement.as_str()).into_owned()
            })
    }
}

#[async_trait]
impl Converter for SubstitutionConverter {
    fn output_name(&self, source_name: &str) -> String {
        replace_extension(source_name, self.output_extension.as_deref())
    }

    async fn convert(&self, input: &Path, outdir: &Path) -> Result<PathBuf> {
        let text = tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("Failed to read {} as text", input.display()))?;
        let source_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = outdir.join(self.output_name(&source_name));
        tokio::fs::write(&output, self.apply(&text))
            .await
            .with_context(|| format!("Failed to write {}", output.display()))?;
        Ok(output)
    }
}

/// Produces one derived file through a [`Converter`], retrying the
/// conversion and reusing output from identical sources.
pub struct SingleFileProcessor {
    converter: Box<dyn Converter>,
    query_param: String,
    max_attempts: u32,
    source: Option<Vec<u8>>,
    dest: Option<ProcessedFile>,
}

impl SingleFileProcessor {
    pub fn new(converter: Box<dyn Converter>, query_param: impl Into<String>) -> Self {
        Self {
            converter,
            query_param: query_param.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            source: None,
            dest: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    fn dest(&self) -> Result<&ProcessedFile, ProcessingError> {
        self.dest
            .as_ref()
            .ok_or_else(|| ProcessingError::Other(anyhow::anyhow!("Destination record not allocated")))
    }

    async fn mark_complete(&self, ctx: &ProcessingContext) -> Result<(), ProcessingError> {
        let id = self.dest()?.id;
        ctx.db
            .call(move |db| db.mark_processed_file_complete(id))
            .await
            .map_err(ProcessingError::Other)
    }
}

async fn read_source(artifact: Arc<dyn Artifact>) -> Result<Vec<u8>, ProcessingError> {
    let resource_id = artifact.unique_id();
    tokio::task::spawn_blocking(move || artifact.read())
        .await
        .context("Source read task panicked")?
        .map_err(|e| {
            warn!(resource_id = %resource_id, error = %e, "Failed to read source");
            ProcessingError::SourceUnavailable { resource_id }
        })
}

#[async_trait]
impl FileProcessor for SingleFileProcessor {
    async fn pre_duplicate_check(&mut self, ctx: &ProcessingContext) -> Result<(), ProcessingError> {
        let bytes = read_source(ctx.artifact.clone()).await?;
        let source_hash = format!("{:x}", Sha256::digest(&bytes));
        self.source = Some(bytes);

        let resource_id = ctx.resource_id();
        let filename = self.converter.output_name(basename(&ctx.artifact.filename()));
        let record = NewProcessedFile {
            resource_id: resource_id.clone(),
            config_id: ctx.config.id,
            storage_key: processed_key(&ctx.config.shortname, &resource_id, &filename),
            filename,
            query_param: self.query_param.clone(),
            source_hash,
        };

        // A rerun replaces whatever an earlier run recorded under this query param.
        let dest = ctx
            .db
            .call(move |db| {
                for stale in db.list_processed_files(&record.resource_id, record.config_id)? {
                    if stale.query_param == record.query_param {
                        db.delete_processed_file(stale.id)?;
                    }
                }
                db.insert_processed_file(&record)
            })
            .await
            .map_err(ProcessingError::Other)?;
        self.dest = Some(dest);
        Ok(())
    }

    async fn check_for_duplicates(&mut self, ctx: &ProcessingContext) -> Result<bool, ProcessingError> {
        let dest = self.dest()?.clone();
        let duplicate = ctx
            .db
            .call(move |db| {
                db.find_duplicate(dest.config_id, &dest.query_param, &dest.source_hash, &dest.resource_id)
            })
            .await
            .map_err(ProcessingError::Other)?;
        let Some(original) = duplicate else {
            return Ok(false);
        };

        let copied = ctx
            .storage
            .copy(&original.storage_key, &self.dest()?.storage_key)
            .map_err(ProcessingError::Storage)?;
        if !copied {
            warn!(
                storage_key = %original.storage_key,
                "Duplicate record has no stored bytes; converting instead"
            );
            return Ok(false);
        }
        self.mark_complete(ctx).await?;
        debug!(from = %original.resource_id, "Copied derived file from identical source");
        Ok(true)
    }

    async fn run(&mut self, ctx: &ProcessingContext) -> Result<(), ProcessingError> {
        let source = match self.source.take() {
            Some(bytes) => bytes,
            None => read_source(ctx.artifact.clone()).await?,
        };
        let workdir = tempfile::tempdir()?;
        let input = workdir.path().join(basename(&ctx.artifact.filename()));
        let outdir = workdir.path().join("out");
        tokio::fs::create_dir_all(&outdir).await?;
        tokio::fs::write(&input, &source).await?;

        let mut output = None;
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.converter.convert(&input, &outdir).await {
                Ok(path) => {
                    output = Some(path);
                    break;
                }
                Err(e) => {
                    warn!(
                        visualizer = %ctx.config.shortname,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Conversion attempt failed"
                    );
                    last_error = format!("{:#}", e);
                }
            }
        }
        let Some(output) = output else {
            return Err(ProcessingError::ConversionFailed {
                attempts: self.max_attempts,
                message: last_error,
            });
        };

        let bytes = tokio::fs::read(&output).await?;
        let key = self.dest()?.storage_key.clone();
        ctx.storage.put(&key, &bytes).map_err(ProcessingError::Storage)?;
        self.mark_complete(ctx).await?;
        // Temp inputs and outputs go only after the bytes are stored.
        workdir.close()?;
        info!(storage_key = %key, bytes = bytes.len(), "Stored derived file");
        Ok(())
    }

    async fn discard_partial(&mut self, ctx: &ProcessingContext) {
        let Some(dest) = self.dest.take() else {
            return;
        };
        if let Err(e) = ctx.storage.delete(&dest.storage_key) {
            warn!(storage_key = %dest.storage_key, error = %e, "Failed to delete partial derived file");
        }
        let id = dest.id;
        if let Err(e) = ctx.db.call(move |db| db.delete_processed_file(id)).await {
            warn!(file_id = id, error = %e, "Failed to delete partial derived file record");
        }
    }
}
