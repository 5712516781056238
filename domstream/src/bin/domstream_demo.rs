//! Pointer tracking demo
//!
//! Reads events from stdin, one per line:
//!
//! ```text
//! mousemove {"x": 10, "y": 20}
//! mousemove {"x": 11, "y": 22}
//! mouseout
//! ```
//!
//! Every `mousemove` position is recorded; `mouseout` ends the stream and
//! prints the recorded positions.

use domstream::{feed_lines, BindOptions, Chunk, EventTable, Stream};
use serde_json::{json, Value};
use tokio::io::BufReader;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut events = EventTable::new();
    let stream = Stream::new("pointer");
    let options = BindOptions::from_value(&json!({"start": "mousemove", "end": "mouseout"}))?;
    stream.source(&mut events, &options)?;

    stream.through(
        |stream, data| {
            let Some((x, y)) = position(data) else {
                eprintln!("ignoring payload without x/y: {data:?}");
                return;
            };
            if let Err(e) = stream.push(json!({"x": x, "y": y})) {
                eprintln!("push error: {e}");
            }
            println!("state: ({x},{y})");
        },
        |stream, _| {
            println!("state: end");
            for chunk in stream.take_all() {
                if let Some((x, y)) = position(&chunk) {
                    println!("{x} {y}");
                }
            }
        },
    );

    println!("Enter events (mousemove {{\"x\":1,\"y\":2}} / mouseout), EOF to quit:");
    let fired = feed_lines(&events, BufReader::new(tokio::io::stdin())).await?;

    println!("{fired} event(s) dispatched");
    Ok(())
}

fn position(chunk: &Chunk) -> Option<(Value, Value)> {
    let value = chunk.as_value()?;
    Some((value.get("x")?.clone(), value.get("y")?.clone()))
}
