use anyhow::Result;
use std::path::PathBuf;

use anno_engine::config::Config;
use anno_engine::engine::{WAIT_POLL_INTERVAL, wait_until_finished};
use anno_engine::store::TaskStore;

pub fn run(config: &Config, id: &str, wait: bool, json: bool) -> Result<()> {
    let store = TaskStore::new(config);
    let path = finished_result(&store, id, wait)?;

    if json {
        let output = serde_json::json!({
            "id": id,
            "path": path,
            "exists": path.exists(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", path.display());
    }
    Ok(())
}

/// Result path of a successful task; a failed task errors with its failed steps' output.
fn finished_result(store: &TaskStore, id: &str, wait: bool) -> Result<PathBuf> {
    let state = if wait {
        wait_until_finished(store, id, WAIT_POLL_INTERVAL)?
    } else {
        store.state(id)?
    };

    if state.is_failed() {
        let log = store.get_log(id, true)?;
        anyhow::bail!("Task {} failed:\n{}", id, log);
    }
    if !state.is_successful() {
        anyhow::bail!("Task {} is not finished ({})", id, state);
    }
    Ok(store.get_result(id)?)
}
