use clap::Parser;
use itertools::Itertools;
use std::thread;
use threadlocal_context::{parse_binding, thread_local_logger, with_tmp_bind};
use tracing::Level;

/// Demo runner: bind values in worker threads and watch them stay apart.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Binding applied on every worker, as key=value (value parsed as JSON)
    #[arg(long = "bind", value_name = "KEY=VALUE")]
    bindings: Vec<String>,
    /// Number of worker threads
    #[arg(long, default_value_t = 2)]
    workers: usize,
    /// Show debug output from the context machinery
    #[arg(long)]
    verbose: bool,
}

fn main() {
    // Parse CLI arguments.
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::TRACE } else { Level::INFO })
        .init();

    // Parse bindings up front.
    let bindings = match args
        .bindings
        .iter()
        .map(|raw| parse_binding(raw))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // One logger, shared kind; each worker sees only its own mapping.
    let logger = thread_local_logger();
    let handles = (0..args.workers)
        .map(|worker| {
            let logger = logger.clone();
            let bindings = bindings.clone();
            thread::spawn(move || {
                let logger = logger.bind([("worker", worker)]).bind(bindings);
                logger.info("worker started");
                let scoped = with_tmp_bind(&logger, [("request", format!("req-{worker}"))], |tmp| {
                    tmp.info("handling request");
                    tmp.context().len()
                });
                if let Err(e) = scoped {
                    logger.error(&e.to_string());
                }
                logger.info("request done");
                logger.context_copy().keys().cloned().collect::<Vec<_>>()
            })
        })
        .collect::<Vec<_>>();

    for (worker, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(keys) => println!("worker {worker}: {}", keys.iter().join(", ")),
            Err(_) => eprintln!("worker {worker} panicked"),
        }
    }
    logger.info("main thread context untouched");
}
