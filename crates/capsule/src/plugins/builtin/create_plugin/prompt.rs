//! Prompts and manifest template for generated capabilities

use std::path::Path;

/// System message: the interface contract plus one complete reference unit
pub const SYSTEM_PROMPT: &str = r##"You write new capabilities for a Rust assistant called capsule.
Reply with the complete contents of a single src/main.rs file and nothing else:
no explanations, no markdown outside the code. The file is saved and compiled as-is.

Every capability is a standalone binary built against the capsule-sdk crate.
Available dependencies: capsule-sdk, anyhow, serde (with derive) and serde_json.
Only the Rust standard library is available beyond those.

The binary must implement this trait and hand it to capsule_sdk::serve from main:

pub trait Capability {
    fn init(&mut self, ctx: &InitContext) -> anyhow::Result<()>;
    fn id(&self) -> String;
    fn description(&self) -> String;
    fn function_schema(&self) -> FunctionSchema;
    fn execute(&mut self, arguments: &str) -> anyhow::Result<String>;
}

Rules:
- id() uses only letters, digits, '-' and '_' and must equal function_schema().name
- function_schema().parameters is always an object schema (ParameterSchema::new())
- execute receives the JSON arguments as text and returns a plain-text result
- never write to stdout; it carries the protocol
- InitContext has two String fields: model and data_dir

Reference implementation of a capability that adds two numbers:

use anyhow::{anyhow, Result};
use capsule_sdk::{serve, Capability, FunctionSchema, InitContext, ParameterProperty, ParameterSchema};
use serde::Deserialize;

#[derive(Deserialize)]
struct Args {
    num1: f64,
    num2: f64,
}

struct AddNumbers;

impl Capability for AddNumbers {
    fn init(&mut self, _ctx: &InitContext) -> Result<()> {
        Ok(())
    }

    fn id(&self) -> String {
        "add".to_string()
    }

    fn description(&self) -> String {
        "Add two numbers together".to_string()
    }

    fn function_schema(&self) -> FunctionSchema {
        FunctionSchema::new(
            "add",
            "Add two numbers together and return the sum",
            ParameterSchema::new()
                .with_required("num1", ParameterProperty::number("The first number"))
                .with_required("num2", ParameterProperty::number("The second number")),
        )
    }

    fn execute(&mut self, arguments: &str) -> Result<String> {
        let args: Args = serde_json::from_str(arguments)
            .map_err(|e| anyhow!("invalid arguments: {}", e))?;
        Ok((args.num1 + args.num2).to_string())
    }
}

fn main() -> std::io::Result<()> {
    serve(AddNumbers)
}
"##;

/// User turn asking the model to fix a build or a rejected unit
pub fn repair_prompt(diagnostics: &str, source: &str) -> String {
    format!(
        "The following Rust code did not produce a usable capability:\n\n{}\n\n\
         Diagnostics:\n\n{}\n\n\
         Reply with the complete fixed src/main.rs. Do not explain the fix or add \
         anything that is not valid Rust, because the reply is compiled as-is.",
        source, diagnostics
    )
}

/// Cargo package name of a generated unit
pub fn package_name(id: &str) -> String {
    format!("capability-{}", id)
}

/// Cargo.toml for a generated unit
///
/// The empty `[workspace]` table keeps cargo from attaching the package to
/// any workspace that happens to enclose the plugin directory.
pub fn manifest(id: &str, sdk_path: &Path) -> String {
    format!(
        r#"[package]
name = "{name}"
version = "0.1.0"
edition = "2021"
publish = false

[dependencies]
capsule-sdk = {{ path = "{sdk}" }}
anyhow = "1"
serde = {{ version = "1", features = ["derive"] }}
serde_json = "1"

[workspace]
"#,
        name = package_name(id),
        sdk = sdk_path.display().to_string().replace('\\', "/"),
    )
}

/// Extract source from a model reply
///
/// Uses the body of the first fenced block when there is one, otherwise the
/// whole reply. An unterminated fence runs to the end of the text.
pub fn strip_code_fences(reply: &str) -> String {
    let Some(open) = reply.find("```") else {
        return reply.trim().to_string();
    };

    let after_fence = &reply[open + 3..];
    // Skip the info string (```rust, ```Rust, ...)
    let body_start = after_fence.find('\n').map_or(after_fence.len(), |i| i + 1);
    let body = &after_fence[body_start..];

    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };

    body.trim().to_string()
}
