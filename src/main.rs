use std::fs;

use color_eyre::eyre::{eyre, WrapErr};
use log::info;

use cache_model::{
    cache::{AccessResult, Cache},
    config::Config,
    trace::{Trace, TraceBlock, TraceEntry, TraceError},
};

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let mut args = pico_args::Arguments::from_env();
    let verbose = args.contains("-v");
    simplelog::TermLogger::init(
        if verbose {
            simplelog::LevelFilter::Debug
        } else {
            simplelog::LevelFilter::Info
        },
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let n_warm: u64 = args
        .opt_value_from_str("-w")
        .wrap_err("-w should be an integer")?
        .unwrap_or(0);
    let n_refs: u64 = args
        .opt_value_from_str("-n")
        .wrap_err("-n should be an integer")?
        .unwrap_or(0);
    let heartbeat_int: u64 = args
        .opt_value_from_str("-h")
        .wrap_err("-h should be an integer")?
        .unwrap_or(0);
    let dump = args.contains("--dump");

    let config = if let Some(config_str) = args.opt_value_from_str::<_, String>("--config")? {
        Config::from_json(&config_str)?
    } else if let Some(config_path) = args.opt_value_from_str::<_, String>("-p")? {
        Config::load(&config_path).wrap_err_with(|| format!("loading {config_path}"))?
    } else {
        Config::single_l1()
    };
    let mut caches = config.to_caches()?;
    for cache in &caches {
        info!("{cache}");
    }

    let stats_path: Option<String> = args.opt_value_from_str("--json")?;

    let trace_path: String = args
        .opt_value_from_str("-t")?
        .ok_or_else(|| eyre!("Must provide a trace with -t"))?;
    let entries_per_block: usize = args
        .opt_value_from_str("--buffer-size")
        .wrap_err("--buffer-size must be an integer")?
        .unwrap_or(1024 * 16);
    let blocks_per_queue: usize = args
        .opt_value_from_str("--queue-size")
        .wrap_err("--queue-size must be an integer")?
        .unwrap_or(32);

    let remaining = args.finish();
    if !remaining.is_empty() {
        return Err(eyre!("Unexpected arguments: {remaining:?}"));
    }

    let trace = Trace::read(trace_path.clone().into(), entries_per_block, blocks_per_queue)
        .wrap_err_with(|| format!("opening trace {trace_path}"))?;

    let n_done = run(&mut caches, trace.blocks(), n_warm, n_refs, heartbeat_int)?;
    info!("Ran {n_done} references");

    if dump {
        for cache in &caches {
            info!("{}", cache.inspect());
        }
    }

    let stats = caches.iter().map(Cache::cache_stats).collect::<Vec<_>>();
    match stats_path {
        Some(path) => {
            let stats_file = fs::File::create(&path).wrap_err("Cannot open output file")?;
            serde_json::to_writer_pretty(stats_file, &stats)?;
        }
        None => println!("{}", serde_json::to_string_pretty(&stats)?),
    }
    Ok(())
}

/// Feeds trace blocks through the caches and returns the number of references processed.
///
/// Statistics are reset after the first `n_warm` references. A non-zero `n_refs` stops the
/// run after `n_warm + n_refs` references.
fn run(
    caches: &mut [Cache],
    blocks: impl IntoIterator<Item = TraceBlock>,
    n_warm: u64,
    n_refs: u64,
    heartbeat_int: u64,
) -> Result<u64, TraceError> {
    let mut n_done: u64 = 0;
    let mut warmup = n_warm > 0;
    let mut next_heartbeat = heartbeat_int;
    let goal = n_warm.saturating_add(n_refs);

    for block in blocks {
        for entry in block? {
            operate(caches, entry);
            n_done += 1;

            if heartbeat_int != 0 && n_done >= next_heartbeat {
                info!("References: {n_done}");
                next_heartbeat = next_heartbeat.saturating_add(heartbeat_int);
            }
            if warmup && n_done == n_warm {
                caches.iter_mut().for_each(Cache::reset_statistics);
                warmup = false;
                info!("Finished Warmup!");
            }
            if n_refs != 0 && n_done == goal {
                return Ok(n_done);
            }
        }
    }
    Ok(n_done)
}

/// Offers one reference to each level in turn, stopping at the first hit.
fn operate(caches: &mut [Cache], entry: TraceEntry) {
    for cache in caches.iter_mut() {
        if cache.access(entry.addr, entry.ty) == AccessResult::Hit {
            break;
        }
    }
}
