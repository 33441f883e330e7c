use anyhow::Result;

use anno_engine::config::Config;

use super::service::{IpcRequest, send_request};

pub fn run(config: &Config, id: &str, priority: bool, json: bool) -> Result<()> {
    let request = IpcRequest::Restart {
        id: id.to_string(),
        priority,
    };
    let data = send_request(config, &request)?.into_result()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("Restarted task {} ({} lane)", id, data["lane"].as_str().unwrap_or("unknown"));
    }
    Ok(())
}
