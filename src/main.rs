use std::process::ExitCode;

use bstk_butler::butler::render_table;
use bstk_butler::protocol::BeanstalkConnection;
use bstk_butler::{Butler, Config, Handler};
use tracing::{error, info};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const USAGE: &str = "\
usage: bstk_butler <command>

commands:
  stats [--json] [tube...]   print tube statistics (all tubes by default)
  tubes                      list tube names
  put <tube> <message>       put one job
  kick <tube> <bound>        kick up to <bound> buried/delayed jobs
  watch <tube>...            print jobs from the given tubes until Ctrl-C
  version                    print version

configuration is read from the environment (BSTK_ADDR, POOL_*, ROULETTE_*, LOG_*)";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = bstk_butler::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(config, args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn async_main(config: Config, args: Vec<String>) -> Result<(), BoxError> {
    let Some((command, rest)) = args.split_first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    match command.as_str() {
        "version" | "--version" => {
            println!("bstk_butler {}", bstk_butler::VERSION);
            return Ok(());
        }
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            return Ok(());
        }
        _ => {}
    }

    config.log_summary();
    let butler = Butler::connect(&config).await?;

    let result = match command.as_str() {
        "stats" => stats(&butler, rest).await,
        "tubes" => {
            for tube in butler.tube_names().await? {
                println!("{}", tube);
            }
            Ok(())
        }
        "put" => match rest {
            [tube, message] => {
                let id = butler.put_job(tube, message).await?;
                println!("{}", id);
                Ok(())
            }
            _ => Err("usage: put <tube> <message>".into()),
        },
        "kick" => match rest {
            [tube, bound] => {
                let kicked = butler.kick_job(tube, bound.parse()?).await?;
                println!("{}", kicked);
                Ok(())
            }
            _ => Err("usage: kick <tube> <bound>".into()),
        },
        "watch" => watch(&butler, &config, rest).await,
        other => Err(format!("unknown command '{}'\n\n{}", other, USAGE).into()),
    };

    butler.close().await;
    result
}

async fn stats(butler: &Butler<BeanstalkConnection>, args: &[String]) -> Result<(), BoxError> {
    let json = args.iter().any(|a| a == "--json");
    let tubes: Vec<&String> = args.iter().filter(|a| *a != "--json").collect();

    let rows = if tubes.is_empty() {
        butler.all_tube_stats().await?
    } else {
        let mut rows = Vec::with_capacity(tubes.len());
        for tube in tubes {
            rows.push(butler.stats_for_tube(tube).await?);
        }
        rows
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print!("{}", render_table(&rows));
    }
    Ok(())
}

async fn watch(
    butler: &Butler<BeanstalkConnection>,
    config: &Config,
    tubes: &[String],
) -> Result<(), BoxError> {
    if tubes.is_empty() {
        return Err("usage: watch <tube>...".into());
    }

    butler.register_handlers(tubes.iter().map(|tube| {
        let name = tube.clone();
        let handler = Handler::new(move |body| {
            let name = name.clone();
            async move {
                println!("{}\t{}", name, String::from_utf8_lossy(&body));
            }
        });
        (tube.clone(), handler)
    }));

    let roulette = butler.start_roulette(
        config.roulette.restart_interval,
        config.roulette.reserve_timeout,
    )?;
    info!(tubes = ?tubes, "watching, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let stats = roulette.stats();
    roulette.shutdown().await;
    info!(
        dispatched = stats.dispatched,
        faults = stats.faults,
        handler_panics = stats.handler_panics,
        "roulette summary"
    );
    Ok(())
}
