//! Demonstrate the translation layer without a server.
//!
//! Usage:
//!   `cargo run --example translate_only`

use dialect_gateway::translate::chat_types::ChatCompletionRequest;
use dialect_gateway::translate::responses_types::ResponsesResponse;
use dialect_gateway::translate::streaming::ResponsesStreamReconstructor;
use dialect_gateway::translate::{bridge, chat, responses, Dialect};

fn main() -> anyhow::Result<()> {
    // A chat-completion request, as a legacy client sends it
    let chat_req: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
        "model": "o3",
        "messages": [
            {"role": "system", "content": "You are a geography expert. Be concise."},
            {"role": "user", "content": "What is the capital of Germany?"}
        ],
        "temperature": 0.2,
        "tools": [{
            "type": "function",
            "function": {
                "name": "lookup_city",
                "description": "Look up facts about a city",
                "parameters": {"type": "object", "properties": {"name": {"type": "string"}}}
            }
        }],
        "tool_choice": "auto"
    }))?;

    // Normalize, apply model-family rules, and render for the structured-response endpoint
    let mut unified = chat::request_to_unified(&chat_req);
    bridge::apply(&mut unified, Dialect::Responses);
    let responses_req = responses::unified_to_request(&unified);

    println!("=== Structured-response request ===");
    println!("{}", serde_json::to_string_pretty(&responses_req)?);

    // A structured-response document, translated back to a chat completion
    let resp: ResponsesResponse = serde_json::from_value(serde_json::json!({
        "id": "resp_demo",
        "object": "response",
        "created_at": 0,
        "model": "o3",
        "status": "completed",
        "output": [{
            "type": "message",
            "id": "msg_1",
            "role": "assistant",
            "content": [{"type": "output_text", "text": "Berlin.", "annotations": []}]
        }],
        "usage": {"input_tokens": 42, "output_tokens": 3, "total_tokens": 45}
    }))?;

    println!();
    println!("=== Chat completion ===");
    println!("{}", serde_json::to_string_pretty(&responses::response_to_chat(&resp))?);

    // Reconstruct chat chunks from a structured-response event stream
    println!();
    println!("=== Streaming reconstruction ===");
    let mut reconstructor = ResponsesStreamReconstructor::new("o3");
    let events = [
        r#"{"type":"response.created","response":{"id":"resp_demo","created_at":0,"model":"o3","output":[]}}"#,
        r#"{"type":"response.output_text.delta","item_id":"msg_1","output_index":0,"content_index":0,"delta":"Ber"}"#,
        r#"{"type":"response.output_text.delta","item_id":"msg_1","output_index":0,"content_index":0,"delta":"lin."}"#,
        r#"{"type":"response.completed","response":{"id":"resp_demo","created_at":0,"model":"o3","status":"completed","output":[],"usage":{"input_tokens":42,"output_tokens":3,"total_tokens":45}}}"#,
    ];
    for data in events {
        for chunk in reconstructor.process_data(data)? {
            println!("  {}", serde_json::to_string(&chunk)?);
        }
    }
    let (_, usage) = reconstructor.finish();
    println!("  final text: {:?}, total tokens: {}", reconstructor.text(), usage.total_tokens);

    println!();
    println!("Done! The translation layer works without any network calls.");
    Ok(())
}
