//! Node kinds available to graph files run from the command line

use async_trait::async_trait;
use nodeflow_core::{
    compute_fn, ComputeError, ComputeStep, ExecutionContext, GraphError, NodeDefinition,
    NodeRegistry, NodeTemplate, PortSpec,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Registry with `constant`, `add`, `print`, `ticker` and `fail`
pub fn builtin_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry
        .register("constant", constant)
        .register("add", add)
        .register("print", print)
        .register("ticker", ticker)
        .register("fail", fail);
    registry
}

/// Emits its `value` property on output 0
fn constant(def: &NodeDefinition) -> nodeflow_core::Result<NodeTemplate> {
    let value = def.property("value").cloned().unwrap_or(Value::Null);
    let compute = compute_fn(move |ctx| {
        ctx.set_output(0, value.clone())?;
        Ok(())
    });
    Ok(NodeTemplate::new(compute).output(PortSpec::data("value")))
}

/// Sums two numeric inputs; unconnected inputs count as zero
fn add(_def: &NodeDefinition) -> nodeflow_core::Result<NodeTemplate> {
    let compute = compute_fn(|ctx| {
        let a = ctx.input(0).unwrap_or(json!(0));
        let b = ctx.input(1).unwrap_or(json!(0));
        ctx.set_output(0, sum(&a, &b)?)?;
        Ok(())
    });
    Ok(NodeTemplate::new(compute)
        .input(PortSpec::typed("a", "number"))
        .input(PortSpec::typed("b", "number"))
        .output(PortSpec::typed("sum", "number")))
}

fn sum(a: &Value, b: &Value) -> Result<Value, ComputeError> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(total) = x.checked_add(y) {
            return Ok(json!(total));
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(json!(x + y)),
        _ => Err(format!("cannot add {} and {}", a, b).into()),
    }
}

/// Writes its data input to stdout; event input 1 lets it run on trigger
fn print(_def: &NodeDefinition) -> nodeflow_core::Result<NodeTemplate> {
    let compute = compute_fn(|ctx| {
        let value = ctx.input(0).unwrap_or(Value::Null);
        println!("[{}] {}", ctx.title(), value);
        Ok(())
    });
    Ok(NodeTemplate::new(compute)
        .input(PortSpec::data("value"))
        .input(PortSpec::event("trigger")))
}

/// Fires its event output `count` times
struct Ticker {
    count: u64,
}

#[async_trait]
impl ComputeStep for Ticker {
    async fn compute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComputeError> {
        for tick in 0..self.count {
            ctx.set_output(1, tick)?;
            ctx.trigger(0).await?;
        }
        Ok(())
    }
}

fn ticker(def: &NodeDefinition) -> nodeflow_core::Result<NodeTemplate> {
    let count = match def.property("count") {
        None => 1,
        Some(value) => value.as_u64().ok_or_else(|| {
            GraphError::Validation(format!(
                "Node '{}': count must be a non-negative integer, got {}",
                def.name, value
            ))
        })?,
    };
    Ok(NodeTemplate::new(Arc::new(Ticker { count }))
        .output(PortSpec::event("tick"))
        .output(PortSpec::typed("index", "number")))
}

/// Always fails with its `message` property
fn fail(def: &NodeDefinition) -> nodeflow_core::Result<NodeTemplate> {
    let message = def
        .property("message")
        .and_then(Value::as_str)
        .unwrap_or("requested failure")
        .to_string();
    Ok(NodeTemplate::new(compute_fn(move |_| Err(message.clone().into()))))
}
