use anyhow::Context;
use serde_json::{json, Value};

use crate::output::print_json;

/// Deliver the completion event for an asynchronously dispatched action.
pub fn raise(
    url: &str,
    instance_id: &str,
    correlation_id: &str,
    response: &str,
    json: bool,
) -> anyhow::Result<()> {
    let response: Value =
        serde_json::from_str(response).context("response must be a JSON document")?;
    let body = json!({
        "instance_id": instance_id,
        "correlation_id": correlation_id,
        "response": response,
    });
    let resp = super::post_json(&format!("{url}/raise-event"), &body)?;
    if json {
        return print_json(&resp);
    }
    if resp["delivered"] == Value::Bool(false) {
        println!("Event for '{correlation_id}' was already delivered; ignored.");
    } else {
        println!("Raised event '{correlation_id}' for instance {instance_id}.");
    }
    Ok(())
}
