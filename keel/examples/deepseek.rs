//! DeepSeek as primary provider with an OpenAI fallback.
//!
//! DeepSeek does not support JSON Schema response formats, so structured
//! output is requested by embedding the schema in the system prompt.
//!
//! Requires `DEEPSEEK_API_KEY`; `OPENAI_API_KEY` enables the fallback.

use futures::StreamExt;
use keel::agent::{AgentProxy, RuntimeConfig};
use keel::prelude::*;
use keel::schemars::{schema_for, JsonSchema};
use keel::StreamPart;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct PersonInfo {
    /// Full name of the person
    name: String,
    /// Age in years
    age: u32,
    /// Current occupation or job title
    occupation: String,
    /// List of hobbies
    hobbies: Vec<String>,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .map_err(|_| "DEEPSEEK_API_KEY environment variable not set")?;

    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    let mut routing = ProviderRoutingConfig::new(ProviderRoute::new("deepseek", "deepseek-chat"));
    if openai_key.is_some() {
        routing = routing.with_fallback(ProviderRoute::new("openai", "gpt-4o-mini"));
    }

    let mut builder = ResilientModel::builder(routing).adapter(deepseek(api_key)?);
    if let Some(key) = openai_key {
        builder = builder.adapter(OpenAiAdapter::new(key));
    }

    let model = builder.build()?;
    let ctx = RequestContext::new("tenant-a");

    println!("=== Example 1: Streaming ===\n");
    let mut stream = model
        .stream_text(&ctx, TextInput::new("Explain ownership in Rust in two sentences."))
        .await?;
    while let Some(part) = stream.next().await {
        if let StreamPart::TextDelta { text } = part? {
            print!("{}", text);
            std::io::stdout().flush()?;
        }
    }
    println!();

    println!("\n=== Example 2: Structured step ===\n");
    let proxy = AgentProxy::builder(Arc::new(model)).build();
    let config = RuntimeConfig::new(
        "extract",
        "step-1",
        "person",
        "Extract person information: Sarah Johnson is a 28-year-old data scientist who enjoys rock climbing, cooking, and playing piano.",
    )
    .with_output_schema(serde_json::to_value(schema_for!(PersonInfo))?)
    .with_structured_max_retries(2);

    match proxy.run(&ctx, &config).await {
        Ok(output) => {
            if let Some(object) = output.object {
                let person: PersonInfo = serde_json::from_value(object)?;
                println!("{:#?}", person);
            }
        }
        Err(e) => eprintln!("Error: {}", e),
    }

    Ok(())
}
