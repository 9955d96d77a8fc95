use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use rpaas_client::RpaasClient;
use rpaas_models::{PurgeArgs, PurgeBulkResult};

/// Parses repeated `Name: value` flags; a repeated name becomes a
/// multi-value header.
pub fn parse_headers(raw: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .with_context(|| format!("expected \"Name: value\", got {:?}", entry))?;
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("empty header name in {:?}", entry);
        }
        headers
            .entry(name.to_string())
            .or_default()
            .push(value.trim().to_string());
    }
    Ok(headers)
}

pub fn load_bulk(path: &PathBuf) -> Result<Vec<PurgeArgs>> {
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let items: Vec<PurgeArgs> = serde_json::from_slice(&content)
        .with_context(|| format!("{} is not a JSON list of purges", path.display()))?;
    if items.is_empty() {
        anyhow::bail!("{} has no purges", path.display());
    }
    Ok(items)
}

pub async fn run_purge(
    client: &RpaasClient,
    instance: &str,
    path: Option<String>,
    preserve_path: bool,
    headers: Vec<String>,
    file: Option<PathBuf>,
) -> Result<ExitCode> {
    if let Some(file) = file {
        let items = load_bulk(&file)?;
        let results = client.purge_bulk(instance, &items).await?;
        print_bulk(&results);
        let failed = results.iter().any(PurgeBulkResult::is_error);
        return Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS });
    }

    let args = PurgeArgs {
        path: path.unwrap_or_default(),
        preserve_path,
        extra_headers: parse_headers(&headers)?,
    };
    args.validate()?;
    let message = client.purge(instance, &args).await?;
    println!("{}", message);
    Ok(ExitCode::SUCCESS)
}

fn print_bulk(results: &[PurgeBulkResult]) {
    println!("{:<50} {:<10} {}", "PATH", "PURGED", "ERROR");
    println!("{}", "-".repeat(85));
    for result in results {
        println!(
            "{:<50} {:<10} {}",
            result.path,
            result
                .instances_purged
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".into()),
            result.error.as_deref().unwrap_or("")
        );
    }
}
