// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Strand CLI
//!
//! Replays JSON scripts of cache operations against a fresh cache and checks
//! query shapes. Step results go to stdout as one JSON object per line; logs
//! go to stderr.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use strand_core::{
    format_path, Cache, CacheConfig, CacheContext, CacheError, ChangeId, PayloadWarning, Query,
    QueryInfo, SerializedGraph, Value, ValueMap,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Strand graph cache developer tool", long_about = None)]
struct Args {
    /// Command to execute
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a script (a JSON array of steps) against an empty cache
    Replay {
        /// Path to the script file
        script: PathBuf,
        /// Cache settings as JSON; missing keys take defaults
        #[arg(long)]
        config: Option<PathBuf>,
        /// Log every read and write
        #[arg(long)]
        verbose: bool,
    },
    /// Parse and validate a query shape; print its canonical text and variables
    Check {
        /// Query text, e.g. '{ viewer { id name } }'
        query: String,
    },
}

/// One script step, tagged by `op`.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    Write {
        query: String,
        #[serde(default)]
        variables: Option<ValueMap>,
        data: Value,
    },
    Read {
        query: String,
        #[serde(default)]
        variables: Option<ValueMap>,
        #[serde(default = "optimistic_by_default")]
        optimistic: bool,
    },
    Optimistic {
        change_id: String,
        query: String,
        #[serde(default)]
        variables: Option<ValueMap>,
        data: Value,
    },
    Rollback {
        change_id: String,
    },
    Extract {
        #[serde(default = "optimistic_by_default")]
        optimistic: bool,
        /// Keep only the nodes this query reaches.
        #[serde(default)]
        prune: Option<String>,
    },
    Restore {
        data: SerializedGraph,
    },
    Reset,
}

fn optimistic_by_default() -> bool {
    true
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(io::stderr)
        .init();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match args.cmd {
        Command::Replay {
            script,
            config,
            verbose,
        } => replay(&script, config.as_deref(), verbose, &mut out),
        Command::Check { query } => check(&query, &mut out),
    }
}

fn replay(script: &Path, config: Option<&Path>, verbose: bool, out: &mut impl Write) -> Result<()> {
    let mut config = match config {
        Some(path) => CacheConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => CacheConfig::default(),
    };
    config.verbose |= verbose;

    let text = std::fs::read_to_string(script)
        .with_context(|| format!("failed to read script {}", script.display()))?;
    let steps: Vec<Step> = serde_json::from_str(&text)
        .with_context(|| format!("malformed script {}", script.display()))?;
    info!(steps = steps.len(), script = %script.display(), "replaying");

    let context = CacheContext::new(config).with_on_change(|snapshot, edited| {
        debug!(
            edited = edited.len(),
            nodes = snapshot.optimistic.len(),
            pending = snapshot.optimistic_queue.len(),
            "snapshot changed"
        );
    });
    let mut cache = Cache::new(context);
    for (index, step) in steps.into_iter().enumerate() {
        let output = run_step(&mut cache, step).with_context(|| format!("step {index} failed"))?;
        writeln!(out, "{}", json!({ "step": index, "output": output }))?;
    }
    Ok(())
}

fn run_step(cache: &mut Cache, step: Step) -> Result<serde_json::Value> {
    let output = match step {
        Step::Write {
            query,
            variables,
            data,
        } => {
            let query = shape(&query, variables)?;
            let warnings = cache.write(&query, &data)?;
            json!({ "op": "write", "warnings": render_warnings(&warnings) })
        }
        Step::Read {
            query,
            variables,
            optimistic,
        } => {
            let result = cache.read(&shape(&query, variables)?, optimistic)?;
            json!({
                "op": "read",
                "complete": result.complete,
                "data": result.result.as_ref().map(Value::to_json),
            })
        }
        Step::Optimistic {
            change_id,
            query,
            variables,
            data,
        } => {
            let query = shape(&query, variables)?;
            let warnings = cache.record_optimistic_update(change_id.as_str(), |transaction| {
                transaction.write(&query, &data)
            })?;
            json!({
                "op": "optimistic",
                "change_id": change_id,
                "warnings": render_warnings(&warnings),
            })
        }
        Step::Rollback { change_id } => {
            cache.rollback(&ChangeId::from(change_id.as_str()))?;
            json!({ "op": "rollback", "change_id": change_id })
        }
        Step::Extract { optimistic, prune } => {
            let graph = match prune {
                Some(text) => cache.extract_pruned(optimistic, &Query::parse(&text)?)?,
                None => cache.extract(optimistic),
            };
            json!({ "op": "extract", "data": serde_json::to_value(graph)? })
        }
        Step::Restore { data } => {
            let nodes = data.len();
            cache.restore(data, None, None)?;
            json!({ "op": "restore", "nodes": nodes })
        }
        Step::Reset => {
            cache.reset();
            json!({ "op": "reset" })
        }
    };
    Ok(output)
}

fn shape(text: &str, variables: Option<ValueMap>) -> Result<Query, CacheError> {
    let query = Query::parse(text)?;
    Ok(match variables {
        Some(variables) => query.with_variables(variables),
        None => query,
    })
}

fn render_warnings(warnings: &[PayloadWarning]) -> Vec<String> {
    warnings
        .iter()
        .map(|warning| {
            format!(
                "{} at {} ({})",
                warning.message,
                format_path(&warning.path),
                warning.container_id
            )
        })
        .collect()
}

fn check(text: &str, out: &mut impl Write) -> Result<()> {
    let query = Query::parse(text)?;
    let info = QueryInfo::new(Arc::clone(&query.document))?;
    let report = json!({
        "label": info.document.label(),
        "canonical": query.document.to_string(),
        "variables": info.variables,
        "defaults": info.variable_defaults,
    });
    writeln!(out, "{report}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_parse_from_tagged_json() {
        let Ok(steps) = serde_json::from_str::<Vec<Step>>(
            r#"[
                { "op": "write", "query": "{ viewer { id } }", "data": { "viewer": { "id": 1 } } },
                { "op": "read", "query": "{ viewer { id } }", "optimistic": false },
                { "op": "rollback", "change_id": "a" },
                { "op": "reset" }
            ]"#,
        ) else {
            unreachable!("script should parse");
        };
        assert_eq!(steps.len(), 4);
        assert!(matches!(&steps[1], Step::Read { optimistic: false, .. }));
        assert_eq!(
            steps[2],
            Step::Rollback {
                change_id: "a".into()
            }
        );
    }

    #[test]
    fn scripts_replay_into_json_lines() {
        let mut cache = Cache::default();
        let write = Step::Write {
            query: "{ viewer { id name } }".into(),
            variables: None,
            data: Value::from(json!({ "viewer": { "id": 1, "name": "A" } })),
        };
        let read = Step::Read {
            query: "{ viewer { name } }".into(),
            variables: None,
            optimistic: true,
        };
        let Ok(written) = run_step(&mut cache, write) else {
            unreachable!("write step failed");
        };
        assert_eq!(written, json!({ "op": "write", "warnings": [] }));
        let Ok(output) = run_step(&mut cache, read) else {
            unreachable!("read step failed");
        };
        assert_eq!(
            output,
            json!({ "op": "read", "complete": true, "data": { "viewer": { "name": "A" } } })
        );
    }

    #[test]
    fn pruned_extract_steps_drop_unreached_nodes() {
        let mut cache = Cache::default();
        let write = Step::Write {
            query: "{ viewer { id } other { id } }".into(),
            variables: None,
            data: Value::from(json!({ "viewer": { "id": 1 }, "other": { "id": 2 } })),
        };
        let Ok(_) = run_step(&mut cache, write) else {
            unreachable!("write step failed");
        };
        let Ok(steps) = serde_json::from_str::<Vec<Step>>(
            r#"[{ "op": "extract", "optimistic": false, "prune": "{ viewer { id } }" }]"#,
        ) else {
            unreachable!("script should parse");
        };
        let Some(extract) = steps.into_iter().next() else {
            unreachable!("one step");
        };
        let Ok(output) = run_step(&mut cache, extract) else {
            unreachable!("extract step failed");
        };
        let Some(nodes) = output["data"].as_object() else {
            unreachable!("extract data is an object");
        };
        let ids: Vec<_> = nodes.keys().map(String::as_str).collect();
        assert_eq!(ids, ["1", "ROOT_QUERY"]);
    }

    #[test]
    fn check_reports_variables() {
        let mut out = Vec::new();
        let Ok(()) = check("query User($id: ID!) { user(id: $id) { name } }", &mut out) else {
            unreachable!("check failed");
        };
        let Ok(report) = serde_json::from_slice::<serde_json::Value>(&out) else {
            unreachable!("report is not JSON");
        };
        assert_eq!(report["label"], json!("User"));
        assert_eq!(report["variables"], json!(["id"]));
        assert_eq!(report["defaults"], json!({}));
    }
}
