//! hetsched CLI for listing devices and comparing scheduling policies.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hetsched_runtime::prelude::*;

#[derive(Parser)]
#[command(name = "hetsched")]
#[command(author, version)]
#[command(about = "Schedule kernels across CPU, GPU and accelerator devices")]
#[command(long_about = "hetsched: run task workloads over simulated heterogeneous devices.

EXAMPLES:
  # List the devices a runtime would start with
  hetsched devices --cpus 2 --gpus 1

  # Run 200 tasks under the PAMS policy
  hetsched run --policy pams --tasks 200 --gpus 2

  # Use devices and policy from a config file
  hetsched run --config runtime.json

POLICIES:
  fcfs - one FIFO queue, head-of-line blocking [default]
  heft - CPU/GPU queues balanced by summed scores
  pams - CPU/GPU lists ordered by speed-up ratio")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct DeviceArgs {
    /// Number of simulated CPU devices
    #[arg(long, default_value = "1", value_name = "N")]
    cpus: usize,

    /// Number of simulated GPU devices
    #[arg(long, default_value = "1", value_name = "N")]
    gpus: usize,

    /// Number of simulated accelerator devices
    #[arg(long, default_value = "0", value_name = "N")]
    accelerators: usize,

    /// JSON runtime config; its devices replace the counts above
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List devices
    Devices {
        #[command(flatten)]
        devices: DeviceArgs,
    },
    /// Run a synthetic increment/saxpy workload
    Run {
        #[command(flatten)]
        devices: DeviceArgs,

        /// Scheduling policy: fcfs, heft, pams (overrides the config)
        #[arg(long, value_name = "POLICY")]
        policy: Option<SchedulerPolicy>,

        /// Number of tasks to submit
        #[arg(long, default_value = "64", value_name = "N")]
        tasks: usize,

        /// Elements per buffer
        #[arg(long, default_value = "1024", value_name = "N")]
        elements: usize,

        /// Random seed for task scores and data
        #[arg(long, default_value = "42", value_name = "SEED")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    match cli.command {
        Commands::Devices { devices } => handle_devices(devices),
        Commands::Run {
            devices,
            policy,
            tasks,
            elements,
            seed,
        } => handle_run(devices, policy, tasks, elements, seed),
    }
}

fn load_config(args: &DeviceArgs) -> Result<RuntimeConfig> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::from_file(path)
            .context(format!("Failed to load config '{}'", path.display()))?,
        None => RuntimeConfig::default(),
    };

    if config.host_devices.is_empty() {
        for i in 0..args.cpus {
            let mut spec = HostDeviceSpec::detect_cpu();
            spec.name = format!("cpu{}", i);
            config = config.with_host_device(spec);
        }
        for i in 0..args.gpus {
            config = config.with_host_device(HostDeviceSpec::gpu(format!("gpu{}", i), 32));
        }
        for i in 0..args.accelerators {
            config = config.with_host_device(HostDeviceSpec::accelerator(format!("acc{}", i), 8));
        }
    }
    if config.host_devices.is_empty() {
        bail!("No devices requested");
    }
    Ok(config)
}

fn handle_devices(args: DeviceArgs) -> Result<()> {
    let config = load_config(&args)?;
    let runtime = Runtime::from_config(config).context("Failed to start runtime")?;

    println!("=== hetsched Devices ===\n");
    for line in runtime.registry().summary() {
        println!("  {}", line);
    }
    println!("\nScheduler: {}", runtime.scheduler_name());
    Ok(())
}

/// Data and expected output of one synthetic task.
enum Workload {
    Increment {
        data: Arc<Buffer>,
        expected: Vec<i32>,
    },
    Saxpy {
        y: Arc<Buffer>,
        expected: Vec<f32>,
    },
}

impl Workload {
    fn verify(&self) -> Result<bool> {
        Ok(match self {
            Workload::Increment { data, expected } => data.to_vec_of::<i32>()? == *expected,
            Workload::Saxpy { y, expected } => {
                let got = y.to_vec_of::<f32>()?;
                got.iter()
                    .zip(expected)
                    .all(|(g, e)| (g - e).abs() <= 1e-4 * e.abs().max(1.0))
            }
        })
    }
}

fn kernels() -> KernelLibrary {
    KernelLibrary::new()
        .with_kernel("increment", |ctx| {
            let mut data = ctx.buffer(0)?;
            for i in 0..ctx.range().len() {
                if let Some(v) = data.get::<i32>(i) {
                    data.set(i, v.wrapping_add(1));
                }
            }
            Ok(())
        })
        .with_kernel("saxpy", |ctx| {
            let a = ctx.f32(2)?;
            let x = ctx.buffer(0)?;
            let mut y = ctx.buffer(1)?;
            for i in 0..ctx.range().len() {
                if let (Some(xi), Some(yi)) = (x.get::<f32>(i), y.get::<f32>(i)) {
                    y.set(i, a * xi + yi);
                }
            }
            Ok(())
        })
}

fn handle_run(
    args: DeviceArgs,
    policy: Option<SchedulerPolicy>,
    tasks: usize,
    elements: usize,
    seed: u64,
) -> Result<()> {
    let mut config = load_config(&args)?;
    if let Some(policy) = policy {
        config.scheduler = policy;
    }

    println!("=== hetsched Run ===\n");
    println!("Configuration:");
    println!("  Policy: {}", config.scheduler);
    println!("  Devices: {}", config.host_devices.len());
    println!("  Tasks: {}", tasks);
    println!("  Elements: {}", elements);
    println!("  Seed: {}\n", seed);

    let runtime = Runtime::from_config(config).context("Failed to start runtime")?;
    let program =
        Program::compile(&runtime, kernels(), None).context("Failed to compile kernels")?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let per_device = Arc::new(Mutex::new(BTreeMap::<DeviceId, usize>::new()));
    let mut workloads = Vec::with_capacity(tasks);

    let start = Instant::now();
    for i in 0..tasks {
        let score = Score::new(rng.gen_range(0.1..10.0), rng.gen_range(0.1..10.0))
            .with_accelerator(rng.gen_range(0.1..10.0));
        let counter = per_device.clone();
        let task = Task::new(program.clone())
            .with_label(format!("task-{}", i))
            .with_score(score)
            .on_complete(move |device, _| {
                *counter.lock().entry(device.id()).or_default() += 1;
                Ok(())
            });

        let task = if i % 2 == 0 {
            let input: Vec<i32> = (0..elements).map(|_| rng.gen_range(-1000..1000)).collect();
            let data = Buffer::for_elements(ElementType::Int, elements, 1, 1)?;
            data.set_elements(&input)?;
            workloads.push(Workload::Increment {
                data: data.clone(),
                expected: input.iter().map(|v| v.wrapping_add(1)).collect(),
            });
            task.with_kernel("increment").on_config(move |_, kernels| {
                kernels.kernel("increment")?.set_input(&data)?;
                Ok(())
            })
        } else {
            let a: f32 = rng.gen_range(-2.0..2.0);
            let xs: Vec<f32> = (0..elements).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let ys: Vec<f32> = (0..elements).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let x = Buffer::for_elements(ElementType::Float, elements, 1, 1)?;
            let y = Buffer::for_elements(ElementType::Float, elements, 1, 1)?;
            x.set_elements(&xs)?;
            y.set_elements(&ys)?;
            workloads.push(Workload::Saxpy {
                y: y.clone(),
                expected: xs.iter().zip(&ys).map(|(x, y)| a * x + y).collect(),
            });
            task.with_kernel("saxpy").on_config(move |_, kernels| {
                kernels
                    .kernel("saxpy")?
                    .set_input(&x)?
                    .set_output(&y)?
                    .set_scalar(2, a)?;
                Ok(())
            })
        };

        runtime
            .submit(task)
            .context(format!("Failed to submit task {}", i))?;
    }
    runtime.finish().context("Workload failed")?;
    let elapsed = start.elapsed();

    let mut wrong = 0;
    for workload in &workloads {
        if !workload.verify()? {
            wrong += 1;
        }
    }

    println!("Results:");
    let counts = per_device.lock();
    for device in runtime.devices() {
        println!(
            "  {:<28} {:>6} task(s)",
            device.to_string(),
            counts.get(&device.id()).copied().unwrap_or(0)
        );
    }
    println!("\n  Completed: {}", runtime.completed_count());
    println!("  Elapsed: {:.2?}", elapsed);

    if wrong > 0 {
        bail!("{} of {} task(s) produced wrong results", wrong, tasks);
    }
    println!("  All results verified");
    Ok(())
}
