// src/core/proxy/target.rs

//! The host side of the invocation boundary.

use crate::core::GateError;
use crate::core::kv_commands::{KV_METHODS, KvCommands};
use crate::core::manager::ConnectionManager;
use crate::core::metrics;
use async_trait::async_trait;
use serde_json::Value;

/// The single generic entry point a proxied object exposes.
#[async_trait]
pub trait CallTarget: Send + Sync + 'static {
    /// Invokes `method` with `args` and returns its result unchanged.
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, GateError>;
}

/// Serves proxied calls against a shard's client, connecting on first use.
pub struct KvCallTarget {
    manager: ConnectionManager,
}

impl KvCallTarget {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl CallTarget for KvCallTarget {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, GateError> {
        // Unknown names are rejected without touching the connection, and are kept out
        // of the metric labels.
        if !KV_METHODS.contains(&method) {
            metrics::PROXY_CALLS_TOTAL.with_label_values(&["unknown"]).inc();
            return Err(GateError::NoSuchMethod(method.to_string()));
        }
        metrics::PROXY_CALLS_TOTAL.with_label_values(&[method]).inc();

        self.manager.init().await?;
        let client = self.manager.client()?;
        dispatch(&client, method, args).await
    }
}

/// Positional arguments of one call, with typed accessors.
struct Args<'a> {
    method: &'a str,
    values: Vec<Value>,
}

impl Args<'_> {
    fn invalid(&self, reason: impl Into<String>) -> GateError {
        GateError::InvalidArgument {
            method: self.method.to_string(),
            reason: reason.into(),
        }
    }

    fn arity(&self, expected: usize) -> Result<(), GateError> {
        if self.values.len() == expected {
            Ok(())
        } else {
            Err(self.invalid(format!(
                "expected {expected} argument(s), got {}",
                self.values.len()
            )))
        }
    }

    /// Coerces a scalar argument to its textual form.
    fn text(&self, index: usize) -> Result<String, GateError> {
        match self.values.get(index) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            Some(other) => Err(self.invalid(format!("argument {index} is not a scalar: {other}"))),
            None => Err(self.invalid(format!("missing argument {index}"))),
        }
    }

    fn int(&self, index: usize) -> Result<i64, GateError> {
        match self.values.get(index) {
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| self.invalid(format!("argument {index} is not an integer"))),
            Some(Value::String(s)) => s
                .parse()
                .map_err(|_| self.invalid(format!("argument {index} is not an integer"))),
            _ => Err(self.invalid(format!("missing integer argument {index}"))),
        }
    }

    fn uint(&self, index: usize) -> Result<u64, GateError> {
        let n = self.int(index)?;
        u64::try_from(n).map_err(|_| self.invalid(format!("argument {index} must not be negative")))
    }
}

/// Invokes the named operation on `client`.
pub async fn dispatch<C>(client: &C, method: &str, args: Vec<Value>) -> Result<Value, GateError>
where
    C: KvCommands + ?Sized,
{
    let args = Args {
        method,
        values: args,
    };
    match method {
        "ping" => {
            args.arity(0)?;
            Ok(Value::String(client.ping().await?))
        }
        "echo" => {
            args.arity(1)?;
            Ok(Value::String(client.echo(&args.text(0)?).await?))
        }
        "get" => {
            args.arity(1)?;
            Ok(client.get(&args.text(0)?).await?.map_or(Value::Null, Value::String))
        }
        "set" => {
            args.arity(2)?;
            client.set(&args.text(0)?, &args.text(1)?).await?;
            Ok(Value::Null)
        }
        "del" => {
            let keys = (0..args.values.len())
                .map(|i| args.text(i))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::from(client.del(&keys).await?))
        }
        "exists" => {
            args.arity(1)?;
            Ok(Value::Bool(client.exists(&args.text(0)?).await?))
        }
        "incr" => {
            args.arity(1)?;
            Ok(Value::from(client.incr(&args.text(0)?).await?))
        }
        "incr_by" => {
            args.arity(2)?;
            Ok(Value::from(client.incr_by(&args.text(0)?, args.int(1)?).await?))
        }
        "decr" => {
            args.arity(1)?;
            Ok(Value::from(client.decr(&args.text(0)?).await?))
        }
        "expire" => {
            args.arity(2)?;
            Ok(Value::Bool(client.expire(&args.text(0)?, args.uint(1)?).await?))
        }
        "ttl" => {
            args.arity(1)?;
            Ok(Value::from(client.ttl(&args.text(0)?).await?))
        }
        _ => Err(GateError::NoSuchMethod(method.to_string())),
    }
}
