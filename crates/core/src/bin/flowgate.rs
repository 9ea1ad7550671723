use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use clap::Parser;
use flowgate::{
    config::ConfigArgs, DelayEstimator, FlowStatistics, GateConfig, Replayer,
};
use tracing::level_filters::LevelFilter;

#[derive(clap::Parser, Debug)]
#[command(name = "flowgate", version, about = "Replay and inspect adaptive cooldown gating")]
struct Cli {
    /// Log level; `RUST_LOG` directives take precedence.
    #[arg(long, global = true, env = "FLOWGATE_LOG_LEVEL")]
    log_level: Option<LevelFilter>,

    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    sub_command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Replay a JSON-lines telemetry trace and print one decision per ack.
    Replay {
        #[arg(long)]
        trace: PathBuf,
    },
    /// Print the cooldown the estimator would choose for the given statistics.
    Estimate {
        #[arg(long)]
        rtt_us: u64,
        #[arg(long, default_value_t = 0)]
        lost: u64,
        #[arg(long, default_value_t = 0)]
        sent: u64,
        #[arg(long, default_value_t = 0)]
        consecutive: u32,
        /// Time since the last loss; omit if the flow never lost a segment.
        #[arg(long)]
        since_loss_ms: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    #[cfg(feature = "trace")]
    flowgate::tracing::tracer::init_tracer(cli.log_level)?;
    let config = cli.config.build()?;

    match cli.sub_command {
        SubCommand::Replay { trace } => replay(config, trace),
        SubCommand::Estimate {
            rtt_us,
            lost,
            sent,
            consecutive,
            since_loss_ms,
        } => {
            let mut stats = FlowStatistics::new(config.default_delay_nanos());
            stats.last_rtt_us = rtt_us;
            stats.lost_packets = lost;
            stats.total_packets = sent;
            stats.consecutive_losses = consecutive;
            // Timestamps are relative; a last loss at 1ns keeps "never lost" distinct.
            let now_ns = match since_loss_ms {
                Some(ms) => {
                    stats.last_loss_time_ns = 1;
                    ms.saturating_mul(1_000_000).saturating_add(1)
                }
                None => 1,
            };
            let estimate = DelayEstimator::from_config(&config).estimate_detailed(&stats, now_ns);
            println!("{}", serde_json::to_string_pretty(&estimate)?);
            Ok(())
        }
    }
}

fn replay(config: GateConfig, trace: PathBuf) -> anyhow::Result<()> {
    let file = File::open(&trace)
        .map_err(|e| anyhow::anyhow!("failed to open trace {}: {e}", trace.display()))?;
    let stdout = io::stdout();
    let summary = Replayer::new(config).run(BufReader::new(file), stdout.lock())?;
    tracing::info!(?summary, "done");
    Ok(())
}
