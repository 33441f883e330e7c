use anyhow::Result;

use anno_engine::config::Config;
use anno_engine::store::TaskStore;

pub fn run(config: &Config, id: &str, failed_only: bool, json: bool) -> Result<()> {
    let log = TaskStore::new(config).get_log(id, failed_only)?;
    if json {
        let output = serde_json::json!({
            "id": id,
            "failed_only": failed_only,
            "log": log,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print!("{}", log);
    }
    Ok(())
}
