use anyhow::Result;

use anno_engine::config::Config;
use anno_engine::store::{TaskStatus, TaskStore};

pub fn run(config: &Config, id: Option<&str>, full: bool, json: bool) -> Result<()> {
    let store = TaskStore::new(config);

    match id {
        Some(id) => {
            let status = store.get_status(id, full)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
        None => {
            let all = store.get_status_all(full)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&all)?);
            } else if all.is_empty() {
                println!("No tasks");
            } else {
                for status in all.values() {
                    print_status(status);
                }
            }
        }
    }
    Ok(())
}

fn print_status(status: &TaskStatus) {
    match status.last {
        Some(ref last) => println!("{}  {:<8}  {} {} ({})", status.id, status.state, last.step, last.state, last.timestamp),
        None => println!("{}  {}", status.id, status.state),
    }
    if let Some(ref detail) = status.detail {
        for step in &detail.steps {
            println!("    {:<24} {:<9} {}", step.step, step.state, step.timestamp);
        }
    }
}
