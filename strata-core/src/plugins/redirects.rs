//! Redirects declared in plugin options.
//!
//! ```toml
//! [[plugins]]
//! name = "redirects"
//! version = "1.0.0"
//! hooks = ["createPages"]
//! options = { redirects = [{ fromPath = "/old", toPath = "/new", isPermanent = true }] }
//! ```

use serde_json::{json, Value};

use crate::error::HandlerError;
use crate::hooks::{HandlerRegistry, Hook, HookContext};
use crate::store::Redirect;

pub const NAME: &str = "redirects";

pub fn register(handlers: &mut HandlerRegistry) {
    handlers.register(NAME, Hook::CreatePages, create_redirects);
}

async fn create_redirects(ctx: HookContext) -> Result<Value, HandlerError> {
    let entries = match ctx.options().get("redirects") {
        None => return Ok(json!({ "redirects": 0 })),
        Some(Value::Array(entries)) => entries.clone(),
        Some(_) => return Err(HandlerError::new("option 'redirects' must be a list")),
    };

    for entry in &entries {
        let redirect: Redirect = serde_json::from_value(entry.clone())?;
        ctx.actions.create_redirect(redirect).await?;
    }
    tracing::debug!("Created {} redirects", entries.len());

    Ok(json!({ "redirects": entries.len() }))
}
