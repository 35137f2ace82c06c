//! Print one line of every message type, as sent on the wire.
//!
//! Useful when changing the driver: its output must decode to the same
//! messages.
//!
//! Run with: cargo run --package protocol --example test_vectors

use protocol::messages::*;
use protocol::LineCodec;

fn main() {
    let codec = LineCodec::new();

    let requests = [
        ("execute", Request::execute("msg-1", "x = 1\nprint(x)")),
        ("shutdown", Request::Shutdown),
    ];
    for (name, request) in &requests {
        print_vector(&codec, name, request);
    }

    let mut plain = MimeBundle::new();
    plain.insert(MIME_TEXT_PLAIN.to_string(), "42".to_string());

    let events = [
        (
            "ready",
            Event::Ready(Ready {
                protocol_version: PROTOCOL_VERSION,
                pid: 4242,
                language_version: "3.11.7".to_string(),
            }),
        ),
        (
            "stream",
            Event::Stream(Stream {
                parent: "msg-1".to_string(),
                name: StreamName::Stdout,
                text: "1\n".to_string(),
            }),
        ),
        (
            "display_data",
            Event::DisplayData(DisplayData {
                parent: "msg-1".to_string(),
                data: plain.clone(),
            }),
        ),
        (
            "execute_result",
            Event::ExecuteResult(ExecuteResult {
                parent: "msg-1".to_string(),
                execution_count: 1,
                data: plain,
            }),
        ),
        (
            "error",
            Event::Error(ErrorReport {
                parent: "msg-1".to_string(),
                ename: "ZeroDivisionError".to_string(),
                evalue: "division by zero".to_string(),
                traceback: vec![
                    "Traceback (most recent call last):".to_string(),
                    "  File \"<cell-1>\", line 1, in <module>".to_string(),
                    "ZeroDivisionError: division by zero".to_string(),
                ],
            }),
        ),
        (
            "execute_reply",
            Event::ExecuteReply(ExecuteReply {
                parent: "msg-1".to_string(),
                status: ReplyStatus::Ok,
                execution_count: 1,
            }),
        ),
        ("shutdown_reply", Event::ShutdownReply),
    ];
    for (name, event) in &events {
        print_vector(&codec, name, event);
    }
}

fn print_vector<T: serde::Serialize>(codec: &LineCodec, name: &str, message: &T) {
    match codec.encode(message) {
        Ok(line) => print!("{:<16} {}", name, String::from_utf8_lossy(&line)),
        Err(e) => eprintln!("{:<16} failed to encode: {}", name, e),
    }
}
