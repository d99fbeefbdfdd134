use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Machine-readable run report: `{ command, safe, chain_id, finished_at, ok, result }`.
pub struct RunReport {
    root: Value,
}

impl RunReport {
    pub fn new(command: &str) -> Self {
        Self {
            root: json!({ "command": command }),
        }
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.root[key] = value;
    }

    pub fn succeed(mut self, result: Value) -> Value {
        self.root["ok"] = json!(true);
        self.root["result"] = result;
        self.finish()
    }

    pub fn fail(mut self, error: &anyhow::Error) -> Value {
        self.root["ok"] = json!(false);
        self.root["error"] = json!(format!("{error:#}"));
        self.finish()
    }

    fn finish(mut self) -> Value {
        let now = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        self.root["finished_at"] = json!(now);
        self.root
    }
}

/// Write through a temp file and rename so readers never see a partial report.
pub fn write_json_atomic(path: &Path, value: &Value) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() && !parent.exists() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating directory {}", parent.display()))?;
    }

    let serialised = serde_json::to_string_pretty(value).context("failed serialising report JSON")?;
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, serialised.as_bytes())
        .with_context(|| format!("failed writing temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("failed replacing {}", path.display()))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
