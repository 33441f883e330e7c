use anyhow::Result;

use anno_engine::config::Config;
use anno_engine::store::TaskStore;

pub fn run(config: &Config, id: &str, json: bool) -> Result<()> {
    TaskStore::new(config).cancel(id)?;
    if json {
        println!("{}", serde_json::json!({ "id": id, "status": "cancelled" }));
    } else {
        println!("Cancelled task {}", id);
    }
    Ok(())
}
