#![doc = include_str!("../README.md")]

mod capture;
mod config;
mod telemetry;

use anyhow::bail;
use capture::{Capture, CodePath, Recorder};
use clap::Parser;
use config::{CliArgs, ProfileConfig};
use stackpipe::{Children, Dispatch, Emitter, PoolProcess, PoolStack, from_iter, pool_fn, run, wrap};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use telemetry::init_telemetry;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ProfileConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    let minimal =
        Duration::from_secs_f64(config.task_delay.as_secs_f64() * config.leaf_calls as f64);
    println!(
        "leaf calls: {}, minimal sequential duration: {minimal:?}",
        config.leaf_calls
    );

    let recorder = Recorder::default();
    let depth = config.pool_sizes.len();
    let process = build_pipeline(&config, &recorder)?;
    let stack = PoolStack::from_capacities(&config.pool_sizes)?;

    let start = Instant::now();
    let result = run(&stack, from_iter([1_usize]), process).await;
    let parallel = start.elapsed();
    stack.release().await?;
    result?;
    println!("(par: {parallel:?})");

    let leaves = recorder.calls(depth, CodePath::Process);
    if leaves != config.leaf_calls as u64 {
        bail!(
            "pipeline ran {leaves} leaf calls, expected {}",
            config.leaf_calls
        );
    }

    let sequential = if config.skip_sequential {
        None
    } else {
        let elapsed = run_sequential(&config).await?;
        println!("(seq: {elapsed:?})");
        Some(elapsed)
    };

    let unix_secs = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let capture = Capture::new(
        config.child_ratio,
        config.pool_sizes.clone(),
        config.task_delay,
        config.leaf_calls,
        parallel,
        sequential,
        &recorder,
    );
    let path = capture.write(&config.output_dir, &config.capture_name(unix_secs))?;
    println!("capture: {}", path.display());

    #[cfg(feature = "tracing")]
    tracing::info!("Profile written to {}", path.display());
    Ok(())
}

fn log_startup_info(_config: &ProfileConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Profiling with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Profiling {} depth(s) at ratio {}",
            _config.pool_sizes.len(),
            _config.child_ratio
        );
    }
}

/// Leaf process: sleeps `delay`, reporting its time at `depth`.
fn leaf(delay: Duration, depth: usize, recorder: Recorder) -> PoolProcess<usize> {
    pool_fn(move |_, value: usize| {
        let recorder = recorder.clone();
        async move {
            let start = Instant::now();
            tokio::time::sleep(delay).await;
            recorder.record(depth, CodePath::Process, start.elapsed());
            Ok(value)
        }
    })
}

/// Emits `ratio` copies of the parent and discards every processed child.
fn fan_out(
    ratio: usize,
    depth: usize,
    recorder: &Recorder,
) -> stackpipe::Result<Dispatch<usize, usize>> {
    let split_recorder = recorder.clone();
    let merge_recorder = recorder.clone();

    Dispatch::builder()
        .split(move |parent: usize, children: Emitter<usize>| {
            let recorder = split_recorder.clone();
            async move {
                let start = Instant::now();
                for _ in 0..ratio {
                    children.emit(parent).await?;
                }
                recorder.record(depth, CodePath::Split, start.elapsed());
                Ok(())
            }
        })
        .merge(move |parent, children: Children<usize>| {
            let recorder = merge_recorder.clone();
            async move {
                let start = Instant::now();
                children.discard().await;
                recorder.record(depth, CodePath::Merge, start.elapsed());
                parent
            }
        })
        .build()
}

/// Wraps the leaf once per depth, the outermost branch point at depth 0.
fn build_pipeline(
    config: &ProfileConfig,
    recorder: &Recorder,
) -> stackpipe::Result<PoolProcess<usize>> {
    let depth = config.pool_sizes.len();
    let mut process = leaf(config.task_delay, depth, recorder.clone());

    for level in (0..depth).rev() {
        process = wrap(process, fan_out(config.child_ratio, level, recorder)?);
    }

    Ok(process)
}

/// Runs the same number of leaf calls one after the other.
async fn run_sequential(config: &ProfileConfig) -> anyhow::Result<Duration> {
    let process = leaf(config.task_delay, 0, Recorder::default());
    let stack = PoolStack::empty();

    let start = Instant::now();
    let mut value = 0;
    for _ in 0..config.leaf_calls {
        value = process(stack.clone(), value).await?;
    }
    let elapsed = start.elapsed();

    core::hint::black_box(value);
    Ok(elapsed)
}
