mod workloads;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::warn;
use uniproc_sim::{MachineConfig, SchedPolicy};

use workloads::{Params, Summary};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Workers share a pool of semaphore units
    Semtest(RunArgs),
    /// Workers update a counter under a lock
    Locktest(RunArgs),
    /// Producers and a consumer meet at a bounded buffer
    Cvtest(RunArgs),
    /// Run every workload
    All(RunArgs),
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Worker threads per workload
    #[arg(long, default_value_t = 8)]
    threads: usize,

    /// Rounds each worker runs
    #[arg(long, default_value_t = 32)]
    iterations: usize,

    /// Seed for the scheduler and the timer
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Chance of a timer interrupt whenever interrupts are unmasked
    #[arg(long, default_value_t = 0.0)]
    preempt: f64,

    /// Pick the next thread at random instead of round-robin
    #[arg(long)]
    random: bool,

    /// Context switches allowed before a run is abandoned
    #[arg(long, default_value_t = 1_000_000)]
    max_switches: u64,

    /// Kernel heap bytes available to the primitives
    #[arg(long)]
    heap: Option<usize>,
}

impl RunArgs {
    fn params(&self) -> Params {
        if !(0.0..=1.0).contains(&self.preempt) {
            warn!("preempt probability {} clamped to [0, 1]", self.preempt);
        }
        Params {
            threads: self.threads,
            iterations: self.iterations,
            machine: MachineConfig {
                policy: if self.random {
                    SchedPolicy::Random
                } else {
                    SchedPolicy::RoundRobin
                },
                seed: self.seed,
                preempt_probability: self.preempt,
                max_switches: Some(self.max_switches),
                heap_limit: self.heap,
            },
        }
    }
}

fn print_summary(summary: &Summary) {
    println!(
        "{}: passed ({} operations, {} threads, {} context switches, {} timer ticks)",
        summary.workload,
        summary.operations,
        summary.report.threads,
        summary.report.switches,
        summary.report.timer_ticks
    );
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    let summaries = match cli.command {
        Commands::Semtest(args) => vec![workloads::semtest(&args.params())?],
        Commands::Locktest(args) => vec![workloads::locktest(&args.params())?],
        Commands::Cvtest(args) => vec![workloads::cvtest(&args.params())?],
        Commands::All(args) => {
            let params = args.params();
            vec![
                workloads::semtest(&params)?,
                workloads::locktest(&params)?,
                workloads::cvtest(&params)?,
            ]
        }
    };

    for summary in &summaries {
        print_summary(summary);
    }

    Ok(())
}
