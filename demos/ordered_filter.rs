//! Number processing with two chained ordered stages
//!
//! Pipeline:
//! 1. Parse: text to numbers, 4 workers, bad input becomes an error item
//! 2. Scale: keep even numbers and multiply by 10, 2 workers
//! 3. Main thread: print items in arrival order and sum them
//!
//! Usage: cargo run --example ordered_filter --release

use ordered_pipeline::{Message, MapTransform, OrderedStage, StreamContext};
use std::sync::Arc;
use std::time::Instant;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("Ordered Number Pipeline");
    println!("=======================");

    let start = Instant::now();
    let ctx = StreamContext::new("numbers");

    let parse = OrderedStage::builder("parse").workers(4).build()?;
    let scale = OrderedStage::builder("scale").workers(2).build()?;

    let parse_node = parse.basic_node::<String, u64>();
    let scale_node = scale.basic_node::<u64, u64>();
    parse_node.connect(scale_node.input_sender());
    let output = scale_node.subscribe();

    let parser = MapTransform::new("parse", |s: String| s.trim().parse::<u64>());
    let scaler = |_: &StreamContext, n: u64| -> Vec<Message<u64>> {
        if n % 2 == 0 {
            vec![Message::Data(n * 10)]
        } else {
            Vec::new()
        }
    };

    let parse_stage = parse.start(&ctx, Arc::clone(&parse_node), parser)?;
    let scale_stage = scale.start(&ctx, Arc::clone(&scale_node), scaler)?;

    for n in 1..=20 {
        parse_node.push(Message::Data(n.to_string()))?;
    }
    parse_node.push(Message::Data("twenty-one".to_string()))?;
    parse_node.push(Message::EndOfStream)?;

    let mut sum = 0;
    for item in output.iter() {
        match item {
            Message::Data(n) => {
                println!("value: {}", n);
                sum += n;
            }
            Message::Error(fault) => println!("error: {}", fault),
            Message::Watermark(ts) => println!("watermark: {}", ts),
            Message::EndOfStream => break,
        }
    }

    ctx.cancel();
    parse_stage.join()?;
    scale_stage.join()?;

    println!("\n=== Final Results ===");
    println!("Sum: {}", sum);
    println!("{}", scale_node.metrics().snapshot().format());
    println!("Pipeline execution time: {:.3}s", start.elapsed().as_secs_f64());

    Ok(())
}
