mod assets;
mod batch;
mod clock;
mod config;
mod export;
mod filter;
mod format;
mod ipc;
mod raster;
mod receipt;
mod registry;
mod sheet;

use std::io::{self, BufRead, Write};
use std::sync::mpsc;

use anyhow::Context;

const LOG_ENV: &str = "RECEIPTD_LOG";

fn init_logging() {
    // stdout carries the IPC stream, so logs go to stderr.
    let default_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::new().filter_or(LOG_ENV, default_filter))
        .target(env_logger::Target::Stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let settings = config::load_settings();

    let (tx, rx) = mpsc::channel::<serde_json::Value>();
    let writer = std::thread::spawn(move || {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        for msg in rx {
            let line = serde_json::to_string(&msg).unwrap_or_else(|_| "{\"ok\":false}".to_string());
            if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
                break;
            }
        }
    });

    let outbox = ipc::Outbox::new(tx);
    let mut state =
        ipc::AppState::new(settings, outbox.clone()).context("failed to prepare the receipt renderer")?;
    log::info!("receiptd {} ready", env!("CARGO_PKG_VERSION"));

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                outbox.send(ipc::err("", "bad_json", e.to_string(), None));
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        outbox.send(resp);
        ipc::after_response(&mut state);
    }

    ipc::shutdown(&mut state);
    drop(state);
    drop(outbox);
    if writer.join().is_err() {
        log::error!("stdout writer panicked");
    }
    Ok(())
}
