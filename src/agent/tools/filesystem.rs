//! File system tools: read, write, list.
//!
//! Each tool can be confined to an allowed directory.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use super::{required_str, Schema, Tool};
use crate::utils::{expand_path, normalize_path};

/// Maximum characters returned by `read_file`
const MAX_READ_CHARS: usize = 100_000;

/// Resolve a user-supplied path against `base` and enforce `allowed_dir`.
pub fn resolve_path(path: &str, base: &Path, allowed_dir: Option<&Path>) -> Result<PathBuf> {
    let expanded = expand_path(path);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    };
    let resolved = normalize_path(&joined);

    if let Some(allowed) = allowed_dir {
        let allowed = normalize_path(allowed);
        if !resolved.starts_with(&allowed) {
            bail!(
                "Path {} is outside allowed directory {}",
                resolved.display(),
                allowed.display()
            );
        }
    }
    Ok(resolved)
}

/// Shared path settings for the file tools
#[derive(Debug, Clone)]
struct PathScope {
    base: PathBuf,
    allowed_dir: Option<PathBuf>,
}

impl PathScope {
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        resolve_path(path, &self.base, self.allowed_dir.as_deref())
    }
}

/// Read a text file
pub struct ReadFileTool {
    scope: PathScope,
}

impl ReadFileTool {
    pub fn new(base: impl Into<PathBuf>, allowed_dir: Option<PathBuf>) -> Self {
        Self {
            scope: PathScope {
                base: base.into(),
                allowed_dir,
            },
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }

    fn parameters(&self) -> Schema {
        Schema::object().required_property(
            "path",
            Schema::string().describe("The file path to read"),
        )
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<String> {
        let path = self.scope.resolve(required_str(&args, "path")?)?;
        if !path.exists() {
            return Ok(format!("Error: File not found: {}", path.display()));
        }
        if !path.is_file() {
            return Ok(format!("Error: Not a file: {}", path.display()));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;

        let total = content.chars().count();
        if total > MAX_READ_CHARS {
            let cut = crate::utils::truncate_chars(&content, MAX_READ_CHARS);
            return Ok(format!(
                "{}\n\n... (truncated, {} of {} chars shown)",
                cut, MAX_READ_CHARS, total
            ));
        }
        Ok(content)
    }
}

/// Write a text file, creating parent directories
pub struct WriteFileTool {
    scope: PathScope,
}

impl WriteFileTool {
    pub fn new(base: impl Into<PathBuf>, allowed_dir: Option<PathBuf>) -> Self {
        Self {
            scope: PathScope {
                base: base.into(),
                allowed_dir,
            },
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file at the given path. Creates parent directories if needed."
    }

    fn parameters(&self) -> Schema {
        Schema::object()
            .required_property("path", Schema::string().describe("The file path to write to"))
            .required_property("content", Schema::string().describe("The content to write"))
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<String> {
        let path = self.scope.resolve(required_str(&args, "path")?)?;
        let content = required_str(&args, "content")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("writing {}", path.display()))?;

        Ok(format!("Successfully wrote {} bytes to {}", content.len(), path.display()))
    }
}

/// List a directory
pub struct ListDirTool {
    scope: PathScope,
}

impl ListDirTool {
    pub fn new(base: impl Into<PathBuf>, allowed_dir: Option<PathBuf>) -> Self {
        Self {
            scope: PathScope {
                base: base.into(),
                allowed_dir,
            },
        }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the contents of a directory."
    }

    fn parameters(&self) -> Schema {
        Schema::object().required_property(
            "path",
            Schema::string().describe("The directory path to list"),
        )
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<String> {
        let path = self.scope.resolve(required_str(&args, "path")?)?;
        if !path.is_dir() {
            return Ok(format!("Error: Not a directory: {}", path.display()));
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&path)
            .await
            .with_context(|| format!("listing {}", path.display()))?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir {
                format!("[dir]  {}", name)
            } else {
                format!("[file] {}", name)
            });
        }

        if entries.is_empty() {
            return Ok(format!("Directory {} is empty", path.display()));
        }
        entries.sort();
        Ok(entries.join("\n"))
    }
}
