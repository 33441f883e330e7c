use anyhow::Result;

use anno_engine::config::Config;
use anno_engine::store::TaskStore;

pub fn run(config: &Config, active: bool, json: bool) -> Result<()> {
    let store = TaskStore::new(config);
    let ids = if active { store.list_active()? } else { store.list_all()? };

    if json {
        let output: Vec<_> = ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "id": id,
                    "state": store.state(id).ok(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if ids.is_empty() {
        if active {
            println!("No active tasks");
        } else {
            println!("No tasks");
        }
    } else {
        for id in &ids {
            println!("{}", id);
        }
    }
    Ok(())
}
