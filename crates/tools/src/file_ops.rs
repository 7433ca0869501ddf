//! Filesystem tools: `fs.read`, `fs.write`, `fs.append`, `fs.list`.
//!
//! Writing tools report their targets through [`Tool::write_targets`] so the
//! router can validate them against the policy allowlist before `run` is
//! ever called. Writes go through temp+rename.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::{Tool, ToolCtx};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
struct ReadRequest {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct WriteRequest {
    path: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ListRequest {
    path: String,
}

fn target_from_args(args: &Value) -> Vec<PathBuf> {
    args.get("path")
        .and_then(Value::as_str)
        .map(|p| vec![PathBuf::from(p)])
        .unwrap_or_default()
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("creating '{}': {e}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp)
        .await
        .map_err(|e| format!("creating '{}': {e}", tmp.display()))?;
    file.write_all(bytes)
        .await
        .map_err(|e| format!("writing '{}': {e}", tmp.display()))?;
    file.sync_all()
        .await
        .map_err(|e| format!("syncing '{}': {e}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| format!("renaming into '{}': {e}", path.display()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fs.read
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FsReadTool;

#[async_trait]
impl Tool for FsReadTool {
    fn name(&self) -> &str {
        "fs.read"
    }

    fn description(&self) -> &str {
        "Read file contents with optional line offset and limit."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path" },
                "offset": { "type": "integer", "description": "Line to start from (0-indexed)" },
                "limit": { "type": "integer", "description": "Maximum lines to return" }
            },
            "required": ["path"]
        })
    }

    async fn run(&self, args: Value, _ctx: &ToolCtx) -> Result<Value, String> {
        let req: ReadRequest =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;

        let content = fs::read_to_string(&req.path)
            .await
            .map_err(|e| format!("failed to read '{}': {e}", req.path))?;

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        let offset = req.offset.unwrap_or(0);
        let limit = req.limit.unwrap_or(total_lines.saturating_sub(offset));
        let selected: Vec<&str> = lines.into_iter().skip(offset).take(limit).collect();

        Ok(serde_json::json!({
            "path": req.path,
            "content": selected.join("\n"),
            "total_lines": total_lines,
            "offset": offset,
            "lines_returned": selected.len(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fs.write
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FsWriteTool;

#[async_trait]
impl Tool for FsWriteTool {
    fn name(&self) -> &str {
        "fs.write"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file atomically."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"]
        })
    }

    fn write_targets(&self, args: &Value) -> Vec<PathBuf> {
        target_from_args(args)
    }

    async fn run(&self, args: Value, _ctx: &ToolCtx) -> Result<Value, String> {
        let req: WriteRequest =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        write_atomic(Path::new(&req.path), req.content.as_bytes()).await?;
        Ok(serde_json::json!({
            "path": req.path,
            "bytes_written": req.content.len(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fs.append
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FsAppendTool;

#[async_trait]
impl Tool for FsAppendTool {
    fn name(&self) -> &str {
        "fs.append"
    }

    fn description(&self) -> &str {
        "Append to a file, creating it if missing."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path" },
                "content": { "type": "string", "description": "Content to append" }
            },
            "required": ["path", "content"]
        })
    }

    fn write_targets(&self, args: &Value) -> Vec<PathBuf> {
        target_from_args(args)
    }

    async fn run(&self, args: Value, _ctx: &ToolCtx) -> Result<Value, String> {
        let req: WriteRequest =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let path = Path::new(&req.path);
        let existing = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(format!("failed to read '{}': {e}", req.path)),
        };
        let mut combined = existing;
        combined.push_str(&req.content);
        write_atomic(path, combined.as_bytes()).await?;
        Ok(serde_json::json!({
            "path": req.path,
            "bytes_appended": req.content.len(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fs.list
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FsListTool;

#[async_trait]
impl Tool for FsListTool {
    fn name(&self) -> &str {
        "fs.list"
    }

    fn description(&self) -> &str {
        "List directory entries with sizes."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path" }
            },
            "required": ["path"]
        })
    }

    async fn run(&self, args: Value, _ctx: &ToolCtx) -> Result<Value, String> {
        let req: ListRequest =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&req.path)
            .await
            .map_err(|e| format!("failed to list '{}': {e}", req.path))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| format!("failed to list '{}': {e}", req.path))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| format!("failed to stat entry: {e}"))?;
            entries.push(serde_json::json!({
                "name": entry.file_name().to_string_lossy(),
                "size": meta.len(),
                "is_dir": meta.is_dir(),
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        Ok(serde_json::json!({
            "path": req.path,
            "entries": entries,
            "count": entries.len(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use pandora_domain::cancel::CancelToken;

    fn ctx() -> ToolCtx {
        ToolCtx::new("p", "tr_test", CancelToken::new())
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");

        let write = FsWriteTool
            .run(
                serde_json::json!({"path": path, "content": "alpha\nbeta\ngamma"}),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(write["bytes_written"], 16);

        let read = FsReadTool
            .run(serde_json::json!({"path": path, "offset": 1, "limit": 1}), &ctx())
            .await
            .unwrap();
        assert_eq!(read["content"], "beta");
        assert_eq!(read["total_lines"], 3);
    }

    #[tokio::test]
    async fn append_creates_and_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");

        FsAppendTool
            .run(serde_json::json!({"path": path, "content": "one\n"}), &ctx())
            .await
            .unwrap();
        FsAppendTool
            .run(serde_json::json!({"path": path, "content": "two\n"}), &ctx())
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "one\ntwo\n");
    }

    #[tokio::test]
    async fn list_reports_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let listing = FsListTool
            .run(serde_json::json!({"path": dir.path()}), &ctx())
            .await
            .unwrap();
        assert_eq!(listing["count"], 2);
        assert_eq!(listing["entries"][0]["name"], "a.txt");
        assert_eq!(listing["entries"][1]["is_dir"], true);
    }

    #[test]
    fn write_tools_expose_targets() {
        let args = serde_json::json!({"path": "/tmp/x", "content": "c"});
        assert_eq!(FsWriteTool.write_targets(&args), vec![PathBuf::from("/tmp/x")]);
        assert_eq!(FsAppendTool.write_targets(&args), vec![PathBuf::from("/tmp/x")]);
        assert!(FsReadTool.write_targets(&args).is_empty());
    }

    #[tokio::test]
    async fn read_missing_file_fails_with_detail() {
        let err = FsReadTool
            .run(serde_json::json!({"path": "/nonexistent/nope.txt"}), &ctx())
            .await
            .unwrap_err();
        assert!(err.contains("failed to read"));
    }
}
