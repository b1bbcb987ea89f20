use genie_core::{ResponseProcessor, parse_robustly};
use std::hint::black_box;
use std::time::Instant;

fn report(name: &str, iterations: u64, elapsed: std::time::Duration) {
    let ns_per_op = elapsed.as_secs_f64() * 1_000_000_000.0 / iterations as f64;

    println!("\n=== {name} ===");
    println!("iterations: {}", iterations);
    println!("total: {:?}", elapsed);
    println!("ns/op: {:.2}", ns_per_op);
    println!("{}\n", "=".repeat(name.len() + 8));
}

fn run_extract_baseline(iterations: u64, reply: &str) {
    let processor = ResponseProcessor::new(r"(?:>\s*)?GenIE_json").expect("marker should compile");

    let start = Instant::now();
    for _ in 0..iterations {
        let text = processor
            .extract_reply(black_box(reply))
            .expect("reply should extract");
        black_box(text);
    }
    report("extract_reply_baseline", iterations, start.elapsed());
}

fn run_repair_baseline(iterations: u64, json: &str) {
    let start = Instant::now();
    for _ in 0..iterations {
        let repaired = parse_robustly(black_box(json)).expect("json should repair");
        black_box(repaired);
    }
    report("repair_pipeline_worst_case", iterations, start.elapsed());
}

fn main() {
    let reply = "noise > GenIE_json\n{\"response\": \"Hi    there $$$\\nfn main() {}\\n$$$\", \"tool_use\": null, \"approval_required\": false, \"approval_prompt\": null}";
    let broken = "{\"response\": \"line one\nline two\", \"tool_use\": null}";

    run_extract_baseline(50_000, reply);
    run_repair_baseline(20_000, broken);
}
