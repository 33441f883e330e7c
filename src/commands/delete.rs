use anyhow::Result;

use anno_engine::config::Config;
use anno_engine::store::TaskStore;

pub fn run(config: &Config, id: &str, json: bool) -> Result<()> {
    TaskStore::new(config).delete(id)?;
    if json {
        println!("{}", serde_json::json!({ "id": id, "status": "deleted" }));
    } else {
        println!("Deleted task {}", id);
    }
    Ok(())
}
