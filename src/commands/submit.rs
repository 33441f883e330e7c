use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anno_engine::config::Config;

use super::service::{IpcRequest, send_request};

/// Options of `anno submit`
#[derive(Debug, Default)]
pub struct SubmitOptions {
    pub vcf_file: Option<PathBuf>,
    pub regions: Option<PathBuf>,
    pub target: Option<String>,
    /// `KEY=VALUE`
    pub vars: Vec<String>,
    /// `KEY=PATH`
    pub files: Vec<String>,
    pub convert_only: bool,
    pub wait: bool,
}

pub fn run(config: &Config, opts: &SubmitOptions, json: bool) -> Result<()> {
    let request = build_request(opts, || {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read input from stdin")?;
        Ok(raw)
    })?;

    let data = send_request(config, &request)?.into_result()?;
    let id = data["id"].as_str().unwrap_or_default();

    if json {
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else if opts.wait {
        println!("{} {}", id, data["state"].as_str().unwrap_or("unknown"));
    } else {
        println!("{}", id);
    }
    Ok(())
}

fn build_request<F>(opts: &SubmitOptions, read_input: F) -> Result<IpcRequest>
where
    F: FnOnce() -> Result<String>,
{
    let (input, vcf_file) = match opts.vcf_file {
        // The daemon resolves paths from its own working directory
        Some(ref path) => {
            let path = fs::canonicalize(path).with_context(|| format!("VCF file {:?} not found", path))?;
            (None, Some(path))
        }
        None => {
            let raw = read_input()?;
            if raw.trim().is_empty() {
                anyhow::bail!("No input given: pipe variants on stdin or pass --vcf-file");
            }
            (Some(raw), None)
        }
    };

    let regions = opts
        .regions
        .as_ref()
        .map(|p| fs::read_to_string(p).with_context(|| format!("Failed to read regions from {:?}", p)))
        .transpose()?;

    let mut variables = BTreeMap::new();
    for var in &opts.vars {
        let (key, value) = split_key_value(var)?;
        variables.insert(key.to_string(), value.to_string());
    }

    let mut files = BTreeMap::new();
    for spec in &opts.files {
        let (key, path) = split_key_value(spec)?;
        let path = Path::new(path);
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("'{}' does not name a file", spec))?;
        files.insert(key.to_string(), (file_name, content));
    }

    Ok(IpcRequest::Submit {
        input,
        vcf_file,
        regions,
        target: opts.target.clone(),
        variables,
        files,
        convert_only: opts.convert_only,
        wait: opts.wait,
    })
}

fn split_key_value(s: &str) -> Result<(&str, &str)> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => anyhow::bail!("Expected KEY=VALUE, got '{}'", s),
    }
}
