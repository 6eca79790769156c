/// Blocking client that sends each line of stdin to an echo server and prints the replies.
///
/// ```sh
/// cargo run --example echo_client --features logging -- ws://127.0.0.1:9001
/// ```
use std::{io::BufRead, time::Duration};

use seqws::{CloseOptions, Message, Options, WebSocket};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    simple_logger::init_with_level(log::Level::Debug).expect("log");

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:9001".to_string());

    let options = Options::default()
        .with_ping_interval(Duration::from_secs(5))
        .with_header("User-Agent", "seqws-echo-client")
        .with_no_delay();

    WebSocket::scoped(url.parse()?, options, |ws| {
        for line in std::io::stdin().lock().lines() {
            let line = line?;
            if line == "/quit" {
                ws.close_with(CloseOptions::default().with_reason("bye"));
                break;
            }

            ws.send(line)?;
            match ws.recv()? {
                Message::Text(text) => println!("< {text}"),
                Message::Binary(data) => println!("< {} bytes", data.len()),
            }
        }

        if let Some(code) = ws.close_code() {
            log::info!("closed by peer: {code:?} {:?}", ws.close_reason());
        }
        Ok(())
    })
}
