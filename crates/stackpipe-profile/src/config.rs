use anyhow::{Context, bail};
use clap::Parser;
use std::{path::PathBuf, time::Duration};

/// Runtime configuration for the `stackpipe-profile` binary.
///
/// The profiled pipeline wraps a sleeping leaf process once per entry of
/// `pool_sizes`: a single input item fans out `child_ratio` times at every
/// depth, so the leaf runs `child_ratio ^ depth` times in total. All values
/// are parsed from CLI arguments or environment variables.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "stackpipe-profile",
    version,
    about = "Profiles a nested stackpipe pipeline against its sequential equivalent"
)]
pub struct CliArgs {
    /// Number of children emitted by every split.
    ///
    /// Environment variable: `CHILD_RATIO`
    #[arg(long, env = "CHILD_RATIO", default_value_t = 4)]
    pub child_ratio: usize,

    /// Capacity of each depth, comma separated. Its length is also the number
    /// of nested branch points. `0` makes a depth pass-through.
    ///
    /// Example: "1,4,16"
    ///
    /// Environment variable: `POOL_SIZES`
    #[arg(
        long,
        env = "POOL_SIZES",
        value_delimiter = ',',
        num_args = 1..,
        default_values_t = [1, 4, 16]
    )]
    pub pool_sizes: Vec<usize>,

    /// Time slept by each leaf call, in milliseconds.
    ///
    /// Environment variable: `TASK_DELAY_MS`
    #[arg(long, env = "TASK_DELAY_MS", default_value_t = 1)]
    pub task_delay_ms: u64,

    /// Directory receiving the JSON capture.
    ///
    /// Environment variable: `OUTPUT_DIR`
    #[arg(long, env = "OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Skip the sequential baseline run.
    #[arg(long, default_value_t = false)]
    pub skip_sequential: bool,
}

#[derive(Debug, Clone)]
pub struct ProfileConfig {
    pub child_ratio: usize,
    pub pool_sizes: Vec<usize>,
    pub task_delay: Duration,
    pub leaf_calls: usize,
    pub output_dir: PathBuf,
    pub skip_sequential: bool,
}

impl TryFrom<CliArgs> for ProfileConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.child_ratio == 0 {
            bail!("CHILD_RATIO must be greater than 0");
        }

        if args.pool_sizes.is_empty() {
            bail!("POOL_SIZES must name at least one depth");
        }

        let depth = u32::try_from(args.pool_sizes.len()).context("POOL_SIZES is too long")?;
        let leaf_calls = args.child_ratio.checked_pow(depth).ok_or_else(|| {
            anyhow::anyhow!(
                "CHILD_RATIO ({}) ^ depth ({}) overflows the number of leaf calls",
                args.child_ratio,
                depth
            )
        })?;

        Ok(Self {
            child_ratio: args.child_ratio,
            pool_sizes: args.pool_sizes,
            task_delay: Duration::from_millis(args.task_delay_ms),
            leaf_calls,
            output_dir: args.output_dir,
            skip_sequential: args.skip_sequential,
        })
    }
}

impl ProfileConfig {
    /// Name of the capture file for a run started at `unix_secs`.
    pub fn capture_name(&self, unix_secs: u64) -> String {
        let sizes = self
            .pool_sizes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("-");
        format!(
            "stackpipe_{unix_secs}_in{}_{sizes}.json",
            self.child_ratio
        )
    }
}
