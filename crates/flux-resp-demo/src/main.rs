//! Minimal key-value server built on `flux-resp`: a handful of commands
//! (`PING`, `ECHO`, `GET`, `SET`, `DEL`) backed by its Robin Hood hash
//! table, wired through the embedder callback surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use flux_resp::{Callbacks, Conn, HashMap, Server};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "flux-resp-demo", about = "A minimal RESP server built on flux-resp")]
struct Args {
    /// Listener address, e.g. `tcp://127.0.0.1:6380` or `[::1]:6380`. May be
    /// repeated to bind more than one address.
    #[arg(long = "listen", default_value = "127.0.0.1:6380")]
    listen: Vec<String>,
}

type Store = HashMap<Vec<u8>, Vec<u8>>;

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .expect("failed to install Ctrl+C handler");
    }

    let mut store = Store::new();

    let callbacks = Callbacks::<()>::new()
        .on_serving(|addrs| {
            for addr in addrs {
                info!(%addr, "listening");
            }
        })
        .on_command(move |conn, args| dispatch(conn, args, &mut store))
        .on_tick(move || {
            // Checked once per iteration; exits after the loop's write pass
            // has already flushed whatever was queued, rather than tearing
            // the process down mid-write.
            if shutdown.load(Ordering::SeqCst) {
                std::process::exit(0);
            }
            Some(Duration::from_millis(200))
        })
        .on_sync(|| true)
        .on_error(|msg, fatal| {
            if fatal {
                error!(%msg, "fatal reactor error");
            } else {
                warn!(%msg, "reactor error");
            }
        });

    let server = Server::<()>::new(args.listen).with_callbacks(callbacks);
    if let Err(err) = server.run() {
        error!(%err, "server exited");
        std::process::exit(1);
    }
}

fn dispatch(conn: &mut Conn<()>, args: &[Vec<u8>], store: &mut Store) {
    let cmd = args[0].as_slice();
    if cmd.eq_ignore_ascii_case(b"PING") {
        match args.len() {
            1 => conn.write_status("PONG"),
            2 => conn.write_bulk(Some(&args[1])),
            _ => conn.write_error("ERR wrong number of arguments for 'ping' command"),
        }
    } else if cmd.eq_ignore_ascii_case(b"ECHO") {
        if args.len() == 2 {
            conn.write_bulk(Some(&args[1]));
        } else {
            conn.write_error("ERR wrong number of arguments for 'echo' command");
        }
    } else if cmd.eq_ignore_ascii_case(b"GET") {
        if args.len() == 2 {
            conn.write_bulk(store.get(&args[1]).map(Vec::as_slice));
        } else {
            conn.write_error("ERR wrong number of arguments for 'get' command");
        }
    } else if cmd.eq_ignore_ascii_case(b"SET") {
        if args.len() == 3 {
            store.set(args[1].clone(), args[2].clone());
            conn.write_status("OK");
        } else {
            conn.write_error("ERR wrong number of arguments for 'set' command");
        }
    } else if cmd.eq_ignore_ascii_case(b"DEL") {
        if args.len() >= 2 {
            let deleted = args[1..].iter().filter(|key| store.delete(key).is_some()).count();
            conn.write_int(deleted as i64);
        } else {
            conn.write_error("ERR wrong number of arguments for 'del' command");
        }
    } else {
        conn.write_error(&format!("ERR unknown command '{}'", String::from_utf8_lossy(cmd)));
    }
}
