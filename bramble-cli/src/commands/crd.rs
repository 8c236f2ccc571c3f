//! Custom resource definitions

use anyhow::Result;
use bramble_core::domain::execution::Execution;
use bramble_core::domain::pipeline::Pipeline;
use kube::CustomResourceExt;
use serde_json::{Value, json};

/// Both definitions wrapped in a `List`
fn definitions() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": [Pipeline::crd(), Execution::crd()],
    })
}

pub fn print() -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&definitions())?);
    Ok(())
}
