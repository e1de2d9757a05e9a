use std::io::Read;
use std::path::Path;

use anyhow::Context;
use serde_json::Value;
use stepwise_core::orchestrator::Payload;

use crate::output::{print_json, print_table, truncate};

// ---------------------------------------------------------------------------
// start
// ---------------------------------------------------------------------------

/// Start an instance from the payload in `file` (`-` reads stdin).
pub fn start(url: &str, file: &Path, json: bool) -> anyhow::Result<()> {
    let text = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?
    };
    let doc: Value = serde_json::from_str(&text).context("payload is not valid JSON")?;
    // Reject malformed payloads before anything reaches the server.
    let payload = Payload::from_value(&doc)?;

    let resp = super::post_json(&format!("{url}/workflows"), &doc)?;
    if json {
        return print_json(&resp);
    }
    let id = resp["instance_id"].as_str().unwrap_or_default();
    println!(
        "Started instance {id} ({} steps, {} actions)",
        payload.steps.len(),
        payload.action_count()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// query
// ---------------------------------------------------------------------------

pub fn query(url: &str, instance_id: &str, json: bool) -> anyhow::Result<()> {
    let resp = super::get_json(&format!("{url}/workflows/{instance_id}"))?;
    if json {
        return print_json(&resp);
    }

    match resp.get("steps").and_then(Value::as_array) {
        Some(steps) => {
            println!("Instance: {instance_id}");
            println!("Result:   {}", resp["status"].as_str().unwrap_or("?"));
            let mut rows = Vec::new();
            for step in steps {
                let name = step["name"].as_str().unwrap_or_default();
                for action in step["actions"].as_array().into_iter().flatten() {
                    rows.push(vec![
                        name.to_string(),
                        action["action"].as_str().unwrap_or_default().to_string(),
                        action["attempt_count"].to_string(),
                        truncate(&action["result"].to_string(), 60),
                    ]);
                }
            }
            if !rows.is_empty() {
                println!();
                print_table(&["STEP", "ACTION", "ATTEMPTS", "RESULT"], rows);
            }
        }
        None => {
            println!("Instance: {instance_id}");
            println!("Status:   {}", resp["runtime_status"].as_str().unwrap_or("?"));
            println!("State:    {}", describe_state(&resp["state"]));
            println!("Updated:  {}", resp["updated_at"].as_str().unwrap_or_default());
            if let Some(err) = resp["error"].as_str() {
                println!("Error:    {err}");
            }
        }
    }
    Ok(())
}

fn describe_state(state: &Value) -> String {
    match (state["type"].as_str(), state["step"].as_u64()) {
        (Some(kind), Some(step)) => format!("{kind} (step {step})"),
        (Some(kind), None) => kind.to_string(),
        _ => "-".to_string(),
    }
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

pub fn list(url: &str, json: bool) -> anyhow::Result<()> {
    let resp = super::get_json(&format!("{url}/workflows"))?;
    if json {
        return print_json(&resp);
    }

    let items = resp.as_array().cloned().unwrap_or_default();
    if items.is_empty() {
        println!("No instances.");
        return Ok(());
    }
    let rows = items
        .iter()
        .map(|i| {
            vec![
                i["instance_id"].as_str().unwrap_or_default().to_string(),
                i["runtime_status"].as_str().unwrap_or_default().to_string(),
                describe_state(&i["state"]),
                i["created_at"].as_str().unwrap_or_default().to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "STATUS", "STATE", "CREATED"], rows);
    Ok(())
}
