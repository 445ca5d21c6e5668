//! Purpose: Reference callee that answers requests through the stdin responder.
//! Role: Smallest real program speaking the child side of the protocol; drives integration tests.
//! Invariants: Stray `println!` output never reaches the caller as protocol data.
//! Notes: The request payload selects behavior via its `op` field; anything else is echoed.
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use procbridge::api::{Error, ErrorKind, Responder, StdoutChannel};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Op {
    Double { n: i64 },
    Count { values: Vec<Value> },
    Noise { value: Value },
    Captured,
    Twice,
    Silent,
    Fail { code: i32 },
    Sleep { ms: u64 },
}

fn main() {
    procbridge::logging::init();
    let mut responder = match Responder::init_from_stdin() {
        Ok(responder) => responder,
        Err(err) => {
            // The fault line is already on stdout; nothing else to answer.
            tracing::debug!(error = %err, "request rejected");
            return;
        }
    };

    let exit_code = match serve(&mut responder) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("procbridge-callee: {err}");
            1
        }
    };
    if let Err(err) = responder.finish() {
        eprintln!("procbridge-callee: {err}");
    }
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn serve(responder: &mut Responder<StdoutChannel>) -> Result<i32, Error> {
    let Ok(op) = serde_json::from_value::<Op>(responder.data().clone()) else {
        let echo = responder.data().clone();
        responder.emit(&echo)?;
        return Ok(0);
    };

    match op {
        Op::Double { n } => match n.checked_mul(2) {
            Some(doubled) => responder.emit(&doubled)?,
            None => responder.fail(format!("Error: {n} * 2 overflows a 64-bit integer"))?,
        },
        Op::Count { values } => {
            for value in &values {
                responder.emit(value)?;
            }
        }
        Op::Noise { value } => {
            println!("noise before the answer");
            responder.emit(&value)?;
            println!("{{\"request_status\": true, \"data\": \"forged\"}}");
        }
        Op::Captured => {
            println!("hidden line");
            let hidden = responder.channel().discarded().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read captured stdout")
                    .with_source(err)
            })?;
            responder.emit(&String::from_utf8_lossy(&hidden))?;
        }
        Op::Twice => {
            responder.emit(&1)?;
            responder.emit(&2)?;
        }
        Op::Silent => {}
        Op::Fail { code } => {
            responder.emit("partial")?;
            eprintln!("simulated failure");
            return Ok(code);
        }
        Op::Sleep { ms } => {
            thread::sleep(Duration::from_millis(ms));
            responder.emit("awake")?;
        }
    }
    Ok(0)
}
