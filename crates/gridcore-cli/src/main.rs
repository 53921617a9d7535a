// SPDX-License-Identifier: AGPL-3.0-only

//! `gridcore`: compile and dispatch demo programs on the software device.
//!
//! ```text
//! USAGE:
//!   gridcore compile  [--width W] [--height H]   Compile and print placement
//!   gridcore dispatch [--width W] [--height H]   Compile, stage a buffer, launch
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gridcore_chip::command::{BankKind, BufferTransfer};
use gridcore_chip::memory_map::NUM_CIRCULAR_BUFFERS;
use gridcore_chip::{CoreCoord, CoreRange};
use gridcore_driver::build::BuildEnvironment;
use gridcore_driver::dispatch::{DispatchExecutor, SoftwareNoc};
use gridcore_driver::report::{CompileStatsReporter, TracingMemoryReporter};
use gridcore_driver::{
    BuildConfig, CircularBufferConfig, ComputeConfig, DataFormat, DataMovementConfig, DataMovementProcessor, Device,
    DispatchConfig, Program, SoftwareDevice,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gridcore", about = "Many-core program compiler and dispatcher", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Compile the demo program and print kernel and buffer placement.
    Compile(GridArgs),
    /// Compile, then stage a buffer into DRAM and launch every worker.
    Dispatch {
        #[command(flatten)]
        grid: GridArgs,
        /// Bytes staged per burst.
        #[arg(long, default_value_t = 8192)]
        burst: u32,
        /// Print the encoded command words.
        #[arg(long)]
        dump: bool,
    },
}

#[derive(Args)]
struct GridArgs {
    /// Worker grid width.
    #[arg(long, default_value_t = 4)]
    width: usize,
    /// Worker grid height.
    #[arg(long, default_value_t = 4)]
    height: usize,
    /// Binary cache directory (defaults to GRIDCORE_BUILD_DIR or the temp dir).
    #[arg(long)]
    build_dir: Option<PathBuf>,
    /// Reuse binaries already in the cache directory.
    #[arg(long)]
    persistent_cache: bool,
    /// Compile threads.
    #[arg(long)]
    threads: Option<usize>,
}

impl GridArgs {
    fn build_config(&self) -> BuildConfig {
        let mut config = BuildConfig::from_env();
        if let Some(dir) = &self.build_dir {
            config.output_dir.clone_from(dir);
        }
        config.persistent_cache |= self.persistent_cache;
        if self.threads.is_some() {
            config.worker_threads = self.threads;
        }
        config
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Compile(grid) => cmd_compile(&grid)?,
        Cmd::Dispatch { grid, burst, dump } => cmd_dispatch(&grid, burst, dump)?,
    }

    Ok(())
}

/// Reader, writer and compute kernels over the whole grid, plus two
/// circular buffers and a semaphore
fn demo_program(width: usize, height: usize) -> Result<Program> {
    anyhow::ensure!(width > 0 && height > 0, "grid must have at least one core");
    let all = CoreRange::new(CoreCoord::new(0, 0), CoreCoord::new(width - 1, height - 1));
    let first_row = CoreRange::new(CoreCoord::new(0, 0), CoreCoord::new(width - 1, 0));

    let mut program = Program::new();
    program.create_data_movement_kernel(
        "kernels/dataflow/reader_unary.cpp",
        all,
        DataMovementConfig::new(DataMovementProcessor::Riscv1).with_compile_args(vec![1]),
    );
    program.create_data_movement_kernel(
        "kernels/dataflow/writer_unary.cpp",
        first_row,
        DataMovementConfig::new(DataMovementProcessor::Riscv0),
    );
    program.create_compute_kernel("kernels/compute/eltwise_sfpu.cpp", all, ComputeConfig::default());

    program.add_circular_buffer(all, CircularBufferConfig::new(2 * 2048, [(0, DataFormat::Float16B)]))?;
    program.add_circular_buffer(
        all,
        CircularBufferConfig::new(2 * 2048, [(NUM_CIRCULAR_BUFFERS / 2, DataFormat::Float16B)]),
    )?;
    program.create_semaphore(first_row, 0)?;
    Ok(program)
}

fn compile_demo(grid: &GridArgs, env: &BuildEnvironment) -> Result<(SoftwareDevice, Program)> {
    let device = SoftwareDevice::new(0, grid.width, grid.height);
    device.initialize();

    let mut program = demo_program(grid.width, grid.height)?;
    program.compile(&device, env).context("compile failed")?;
    program.configure_device(&device).context("device configuration failed")?;
    info!(
        "Compiled program {} for {} worker cores on a {}x{} grid",
        program.id(),
        program.worker_cores().num_cores(),
        grid.width,
        grid.height
    );
    Ok((device, program))
}

fn cmd_compile(grid: &GridArgs) -> Result<()> {
    let stats = Arc::new(CompileStatsReporter::new());
    let env = BuildEnvironment::new(grid.build_config())
        .with_compilation_reporter(stats.clone())
        .with_memory_reporter(Arc::new(TracingMemoryReporter::new()));
    let (_device, mut program) = compile_demo(grid, &env)?;

    println!("Program {} on {}x{} grid", program.id(), grid.width, grid.height);
    println!("Cache  : {}", env.output_dir().display());
    println!();

    println!("Kernels:");
    for kernel in program.kernels() {
        println!(
            "  [{:>3}] {:<20} {:<8} {}  -> {}",
            kernel.id(),
            kernel.name(),
            kernel.processor().to_string(),
            kernel.core_range_set(),
            kernel.binary_path().map_or_else(|| "-".into(), |p| p.display().to_string())
        );
    }
    println!();

    println!("Circular buffers:");
    for cb in program.circular_buffers() {
        let slots: Vec<String> = cb.buffer_indices().map(|i| i.to_string()).collect();
        println!(
            "  [{:>3}] {:>6} B at {:#08x}  slots {}  on {}",
            cb.id(),
            cb.size(),
            cb.address().unwrap_or_default(),
            slots.join(","),
            cb.core_ranges()
        );
    }
    println!();

    let groups = program.core_to_kernel_group()?.len();
    println!("Worker cores  : {} ({} groups)", program.worker_cores().num_cores(), groups);
    println!("Semaphores    : {}", program.num_semaphores());
    if let Some(s) = stats.stats(program.id()) {
        println!("Compile cache : {} hits, {} generated", s.cache_hits, s.cache_misses);
    }
    Ok(())
}

fn cmd_dispatch(grid: &GridArgs, burst: u32, dump: bool) -> Result<()> {
    let env = BuildEnvironment::new(grid.build_config());
    let (device, program) = compile_demo(grid, &env)?;

    let config = DispatchConfig::default();
    let mut noc = SoftwareNoc::new();
    for bank in &config.dram_banks {
        noc.add_dram_bank(bank.noc_xy);
    }
    for core in program.worker_cores().cores() {
        noc.add_worker(device.worker_core_from_logical_core(core));
    }

    let page_size = 2048u32;
    let buffer_size = page_size * 16;
    let host_addr = 0x1000;
    let host_data: Vec<u8> = (0..buffer_size).map(|i| (i % 256) as u8).collect();
    noc.write_node(SoftwareNoc::host_xy(), host_addr, &host_data)?;

    let mut command = program.launch_command(&device);
    command.data_size = buffer_size;
    command.buffer_writes.push(BufferTransfer {
        remote_addr: host_addr,
        remote_noc: SoftwareNoc::host_xy(),
        bank_base_addr: 0,
        padded_buf_size: buffer_size,
        burst_size: burst,
        page_size,
        padded_page_size: page_size,
        bank_kind: BankKind::Interleaved,
    });

    let words = command.encode();
    if dump {
        for (i, chunk) in words.chunks(8).enumerate() {
            let line: Vec<String> = chunk.iter().map(|w| format!("{w:08x}")).collect();
            println!("{:04}: {}", i * 8, line.join(" "));
        }
        println!();
    }

    let mut executor = DispatchExecutor::new(noc, config);
    let stats = executor.run(&words)?;
    info!(
        "Dispatched {} words: {} pages, {} workers launched",
        words.len(),
        stats.pages,
        stats.workers_launched
    );
    let noc_stats = executor.noc().stats();

    println!("Command words  : {}", words.len());
    println!("Pages written  : {} in {} bursts", stats.pages, stats.bursts);
    println!("Workers        : {} launched, {} polls", stats.workers_launched, stats.completion_polls);
    println!(
        "NoC            : {} reads, {} writes, {} multicasts, {} B out",
        noc_stats.reads, noc_stats.writes, noc_stats.multicasts, noc_stats.bytes_written
    );
    println!("Host signalled : {}", stats.finished);
    Ok(())
}
