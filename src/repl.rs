//! Interactive `tftp> ` prompt (spec.md §4.7/§6), out of the core per
//! spec.md §2. Grounded in `original_source/pkg/client/cli.go` and
//! `evaluator.go`'s command table, translated from `bufio.Scanner` into
//! `std::io::{stdin, BufRead}`.

use std::io::{self, BufRead, Write};
use std::path::Path;

use crate::client::Client;

const HELP_TEXT: &str = "\
Commands:
  connect <host> <port>   set the remote endpoint
  get <file>              download <file> from the server into the current directory
  put <file>              upload <file> from the current directory to the server
  timeout <seconds>       set the per-datagram read/write timeout
  trace                   toggle per-block diagnostic logging
  help                    print this command list
  quit                    exit";

/// Run the REPL against `client` until `quit` or EOF on stdin. Mirrors the
/// Go original's `Cli.Read`/`Evaluator.evaluate` loop: one line in, one
/// `(done, result)` out, printed if it's an error.
pub async fn run(client: &mut Client) {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("tftp> ");
        let _ = io::stdout().flush();

        let Some(line) = lines.next() else { break };
        let Ok(line) = line else { break };

        match evaluate(client, &line).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(msg) => println!("{msg}"),
        }
    }
}

/// Parse and run one line. Returns `Ok(true)` on `quit`, `Ok(false)`
/// otherwise, `Err(message)` for anything that should be printed without
/// ending the session — unrecognized commands, wrong argument counts,
/// transfer failures.
async fn evaluate(client: &mut Client, line: &str) -> Result<bool, String> {
    let line = line.trim_end_matches(['\n', '\r']);
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some(&cmd) = words.first() else { return Ok(false) };

    match cmd {
        "connect" => {
            if words.len() != 3 {
                return Err(format!("connect command received the wrong number of arguments: {line}"));
            }
            let port: u16 = words[2]
                .parse()
                .map_err(|_| format!("invalid port: {}", words[2]))?;
            client.connect(words[1], port).await.map_err(|e| e.to_string())?;
            Ok(false)
        }
        "trace" => {
            if words.len() != 1 {
                return Err(format!("trace command received too many arguments: {line}"));
            }
            let on = client.toggle_trace();
            println!("trace {}", if on { "on" } else { "off" });
            Ok(false)
        }
        "timeout" => {
            if words.len() != 2 {
                return Err(format!("timeout command received the wrong number of arguments: {line}"));
            }
            let secs: u64 = words[1]
                .parse()
                .map_err(|_| format!("invalid timeout: {}", words[1]))?;
            client.set_timeout(secs);
            Ok(false)
        }
        "get" => {
            if words.len() != 2 {
                return Err(format!("get command received too many arguments: {line}"));
            }
            let filename = words[1];
            client
                .get(filename, Path::new(filename))
                .await
                .map(|_| ())
                .map_err(|e| format!("error while receiving file {filename}: {e}"))?;
            Ok(false)
        }
        "put" => {
            if words.len() != 2 {
                return Err(format!("put command received too many arguments: {line}"));
            }
            let filename = words[1];
            client
                .put(filename, Path::new(filename))
                .await
                .map(|_| ())
                .map_err(|e| format!("error while sending file {filename}: {e}"))?;
            Ok(false)
        }
        "help" => {
            println!("{HELP_TEXT}");
            Ok(false)
        }
        "quit" => {
            if words.len() != 1 {
                return Err(format!("quit command received too many arguments: {line}"));
            }
            Ok(true)
        }
        _ => Err(format!("unknown command: {line}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_command_is_an_error_not_a_quit() {
        let mut client = Client::default();
        let result = evaluate(&mut client, "frobnicate").await;
        assert_eq!(result, Err("unknown command: frobnicate".into()));
    }

    #[tokio::test]
    async fn quit_ends_the_loop() {
        let mut client = Client::default();
        assert_eq!(evaluate(&mut client, "quit").await, Ok(true));
    }

    #[tokio::test]
    async fn get_before_connect_reports_not_connected() {
        let mut client = Client::default();
        let result = evaluate(&mut client, "get missing.txt").await;
        assert!(result.unwrap_err().contains("not connected"));
    }

    #[tokio::test]
    async fn connect_rejects_wrong_arg_count() {
        let mut client = Client::default();
        let result = evaluate(&mut client, "connect localhost").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_line_is_a_no_op() {
        let mut client = Client::default();
        assert_eq!(evaluate(&mut client, "").await, Ok(false));
    }
}
