// SPDX-License-Identifier: AGPL-3.0-only

//! Dispatch executor against the software NoC
//!
//! Streams are built with `DeviceCommand` and encoded exactly as the host
//! would ship them.

use gridcore_chip::command::{BankKind, BufferTransfer, DeviceCommand, LaunchGroup, ProgramRelay, RelayWrite};
use gridcore_chip::memory_map::{
    run_msg, CQ_FINISH_PTR, DEVICE_COMMAND_DATA_ADDR, DISPATCH_MESSAGE_ADDR, HOST_CQ_FINISH_PTR,
};
use gridcore_chip::noc::{core_xy, noc_multicast_encoding, NocAddr};
use gridcore_chip::{CoreCoord, CoreRange};
use gridcore_driver::dispatch::{DispatchExecutor, Noc, SoftwareNoc};
use gridcore_driver::{
    BuildConfig, BuildEnvironment, ComputeConfig, DataMovementConfig, DataMovementProcessor, DispatchConfig,
    GridError, Program, Result, SoftwareDevice,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const HOST_SRC: u32 = 0x1000;
const HOST_DST: u32 = 0x10_0000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn noc_with_banks(config: &DispatchConfig) -> SoftwareNoc {
    let mut noc = SoftwareNoc::new();
    for bank in &config.dram_banks {
        noc.add_dram_bank(bank.noc_xy);
    }
    noc
}

fn add_grid(noc: &mut SoftwareNoc, start: CoreCoord, end: CoreCoord) {
    for core in CoreRange::new(start, end).cores() {
        noc.add_worker(core);
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn transfer(remote_addr: u32, padded_buf_size: u32, burst_size: u32, bank_kind: BankKind) -> BufferTransfer {
    BufferTransfer {
        remote_addr,
        remote_noc: SoftwareNoc::host_xy(),
        bank_base_addr: 0x2000,
        padded_buf_size,
        burst_size,
        page_size: 1000,
        padded_page_size: 1024,
        bank_kind,
    }
}

#[test]
fn test_launch_waits_for_every_group() {
    let mut noc = SoftwareNoc::new();
    add_grid(&mut noc, CoreCoord::new(1, 1), CoreCoord::new(3, 1));
    add_grid(&mut noc, CoreCoord::new(1, 2), CoreCoord::new(5, 2));

    let command = DeviceCommand {
        num_workers: 8,
        launch_groups: vec![
            LaunchGroup {
                dst_noc: noc_multicast_encoding((1, 1), (3, 1)),
                num_receivers: 3,
            },
            LaunchGroup {
                dst_noc: noc_multicast_encoding((1, 2), (5, 2)),
                num_receivers: 5,
            },
        ],
        ..DeviceCommand::default()
    };

    let mut executor = DispatchExecutor::new(noc, DispatchConfig::default());
    let stats = executor.run(&command.encode()).expect("run");

    assert_eq!(stats.workers_launched, 8);
    assert_eq!(stats.multicasts, 2);
    assert_eq!(stats.completion_polls, 7);
    assert!(!stats.finished);

    let noc = executor.into_noc();
    assert_eq!(noc.pending_workers(), 0);
    assert_eq!(noc.read_local(DISPATCH_MESSAGE_ADDR, 4).unwrap(), &8u32.to_le_bytes());
    for core in CoreRange::new(CoreCoord::new(1, 1), CoreCoord::new(5, 2)).cores() {
        if core.y == 1 && core.x > 3 {
            continue;
        }
        let msg = noc.launch_message(core).expect("mailbox");
        assert_eq!(msg.run, run_msg::DONE, "worker {core} never reported");
        assert!(msg.enable_dm0 && msg.enable_dm1 && msg.enable_compute);
    }
}

/// Workers are real threads that bump a shared counter after a delay
#[derive(Debug, Default)]
struct ThreadedNoc {
    counter: Arc<AtomicU32>,
    workers: Vec<JoinHandle<()>>,
}

impl Noc for ThreadedNoc {
    fn async_read(&mut self, _src: NocAddr, _local_addr: u32, _size: u32) -> Result<()> {
        Ok(())
    }

    fn async_write(&mut self, _local_addr: u32, _dst: NocAddr, _size: u32) -> Result<()> {
        Ok(())
    }

    fn async_write_multicast(&mut self, _local_addr: u32, _dst: NocAddr, _size: u32, num_dests: u32) -> Result<()> {
        for i in 0..num_dests {
            let counter = Arc::clone(&self.counter);
            self.workers.push(std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(u64::from(i) * 3));
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        Ok(())
    }

    fn async_read_barrier(&mut self) {}

    fn async_write_barrier(&mut self) {}

    fn read_local_u32(&mut self, addr: u32) -> u32 {
        assert_eq!(addr, DISPATCH_MESSAGE_ADDR);
        self.counter.load(Ordering::SeqCst)
    }

    fn write_local(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if addr == DISPATCH_MESSAGE_ADDR {
            self.counter.store(u32::from_le_bytes([data[0], data[1], data[2], data[3]]), Ordering::SeqCst);
        }
        Ok(())
    }
}

#[test]
fn test_launch_barrier_with_concurrent_workers() {
    let command = DeviceCommand {
        num_workers: 8,
        launch_groups: vec![
            LaunchGroup {
                dst_noc: 0,
                num_receivers: 3,
            },
            LaunchGroup {
                dst_noc: 0,
                num_receivers: 5,
            },
        ],
        ..DeviceCommand::default()
    };

    let mut executor = DispatchExecutor::new(ThreadedNoc::default(), DispatchConfig::default());
    let stats = executor.run(&command.encode()).expect("run");
    assert_eq!(stats.workers_launched, 8);

    let noc = executor.into_noc();
    assert_eq!(noc.counter.load(Ordering::SeqCst), 8);
    for worker in noc.workers {
        worker.join().expect("worker thread");
    }
}

#[test]
fn test_interleaved_write_then_read_round_trips() {
    let config = DispatchConfig::default();
    let mut noc = noc_with_banks(&config);
    let host = pattern(10 * 1024);
    noc.write_node(SoftwareNoc::host_xy(), HOST_SRC, &host).unwrap();

    let mut read_back = transfer(HOST_DST, 10 * 1024, 4096, BankKind::Interleaved);
    read_back.burst_size = 3072;
    let command = DeviceCommand {
        finish: true,
        buffer_writes: vec![transfer(HOST_SRC, 10 * 1024, 4096, BankKind::Interleaved)],
        buffer_reads: vec![read_back],
        ..DeviceCommand::default()
    };

    let mut executor = DispatchExecutor::new(noc, config.clone());
    let stats = executor.run(&command.encode()).expect("run");
    assert_eq!(stats.buffer_writes, 1);
    assert_eq!(stats.buffer_reads, 1);
    assert_eq!(stats.pages, 20);
    // 4096 + 4096 + 2048 on the way in, 3 × 3072 + 1024 on the way out.
    assert_eq!(stats.bursts, 7);
    assert!(stats.finished);

    let noc = executor.into_noc();
    for page in 0..10usize {
        let bank = config.dram_banks[page % 8];
        let addr = 0x2000 + (page / 8) as u32 * 1024;
        let on_bank = noc.read_node(bank.noc_xy, addr, 1000).unwrap();
        assert_eq!(on_bank, &host[page * 1024..page * 1024 + 1000], "page {page} on bank");

        let back = noc
            .read_node(SoftwareNoc::host_xy(), HOST_DST + page as u32 * 1024, 1000)
            .unwrap();
        assert_eq!(back, &host[page * 1024..page * 1024 + 1000], "page {page} read back");
    }

    assert_eq!(
        noc.read_node(SoftwareNoc::host_xy(), HOST_CQ_FINISH_PTR, 4).unwrap(),
        1u32.to_le_bytes()
    );
    assert_eq!(noc.read_local(CQ_FINISH_PTR, 4).unwrap(), &[0; 4]);
}

#[test]
fn test_local_bank_pages_stack() {
    let config = DispatchConfig::default();
    let mut noc = SoftwareNoc::new();
    noc.add_worker(CoreCoord::new(1, 1));
    let host = pattern(2048);
    noc.write_node(SoftwareNoc::host_xy(), HOST_SRC, &host).unwrap();

    let command = DeviceCommand {
        buffer_writes: vec![transfer(HOST_SRC, 2048, 2048, BankKind::Local)],
        ..DeviceCommand::default()
    };
    let mut executor = DispatchExecutor::new(noc, config);
    executor.run(&command.encode()).expect("run");

    let l1 = core_xy(CoreCoord::new(1, 1));
    let noc = executor.noc();
    assert_eq!(noc.read_node(l1, 0x2000, 1000).unwrap(), &host[..1000]);
    assert_eq!(noc.read_node(l1, 0x2000 + 1024, 1000).unwrap(), &host[1024..2024]);
}

#[test]
fn test_relay_fans_out_program_sections() {
    let mut noc = SoftwareNoc::new();
    add_grid(&mut noc, CoreCoord::new(1, 1), CoreCoord::new(2, 2));
    let binary = pattern(256);
    noc.write_node(SoftwareNoc::host_xy(), 0x4000, &binary).unwrap();

    let command = DeviceCommand {
        program_relays: vec![ProgramRelay {
            src: 0x4000,
            src_noc: SoftwareNoc::host_xy(),
            transfer_size: 256,
            writes: vec![
                RelayWrite {
                    src: DEVICE_COMMAND_DATA_ADDR,
                    dst: 0x2_0000,
                    dst_noc: noc_multicast_encoding((1, 1), (2, 2)),
                    transfer_size: 128,
                    num_receivers: 4,
                },
                RelayWrite {
                    src: DEVICE_COMMAND_DATA_ADDR + 128,
                    dst: 0x3_0000,
                    dst_noc: noc_multicast_encoding((2, 1), (2, 1)),
                    transfer_size: 128,
                    num_receivers: 1,
                },
            ],
        }],
        ..DeviceCommand::default()
    };

    let mut executor = DispatchExecutor::new(noc, DispatchConfig::default());
    let stats = executor.run(&command.encode()).expect("run");
    assert_eq!(stats.relays, 1);
    assert_eq!(stats.multicasts, 2);

    let noc = executor.noc();
    for core in CoreRange::new(CoreCoord::new(1, 1), CoreCoord::new(2, 2)).cores() {
        assert_eq!(noc.read_node(core_xy(core), 0x2_0000, 128).unwrap(), &binary[..128]);
    }
    assert_eq!(noc.read_node(core_xy(CoreCoord::new(2, 1)), 0x3_0000, 128).unwrap(), &binary[128..]);
    assert_eq!(noc.read_node(core_xy(CoreCoord::new(1, 1)), 0x3_0000, 128).unwrap(), vec![0; 128]);
    assert_eq!(noc.stats().read_barriers, 1);
    assert_eq!(noc.stats().write_barriers, 1);
}

#[test]
fn test_compiled_program_launches_on_software_noc() {
    let dir = tempfile::tempdir().unwrap();
    let env = BuildEnvironment::new(BuildConfig::with_output_dir(dir.path()));
    let device = SoftwareDevice::new(0, 2, 2);
    device.initialize();

    let cores = CoreRange::new(CoreCoord::new(0, 0), CoreCoord::new(1, 1));
    let mut program = Program::new();
    program.create_data_movement_kernel(
        "kernels/dataflow/reader.cpp",
        cores,
        DataMovementConfig::new(DataMovementProcessor::Riscv0),
    );
    program.create_compute_kernel("kernels/compute/eltwise.cpp", cores, ComputeConfig::default());
    program.compile(&device, &env).expect("compile");

    let command = program.launch_command(&device);
    assert_eq!(command.num_workers, 4);
    assert!(command.finish);

    let mut noc = SoftwareNoc::new();
    add_grid(&mut noc, CoreCoord::new(1, 1), CoreCoord::new(2, 2));
    let mut executor = DispatchExecutor::new(noc, DispatchConfig::default());
    let stats = executor.run(&command.encode()).expect("run");
    assert_eq!(stats.workers_launched, 4);
    assert!(stats.finished);

    let noc = executor.noc();
    for core in CoreRange::new(CoreCoord::new(1, 1), CoreCoord::new(2, 2)).cores() {
        assert_eq!(noc.launch_message(core).unwrap().run, run_msg::DONE);
    }
    assert_eq!(
        noc.read_node(SoftwareNoc::host_xy(), HOST_CQ_FINISH_PTR, 4).unwrap(),
        1u32.to_le_bytes()
    );
}

#[test]
fn test_truncated_stream_rejected() {
    init_tracing();
    let command = DeviceCommand {
        buffer_writes: vec![transfer(HOST_SRC, 1024, 1024, BankKind::Interleaved)],
        ..DeviceCommand::default()
    };
    let words = command.encode();
    let mut executor = DispatchExecutor::new(SoftwareNoc::new(), DispatchConfig::default());

    let err = executor.run(&words[..words.len() - 2]).unwrap_err();
    assert!(matches!(err, GridError::MalformedCommand { offset: 8, .. }));
    assert!(matches!(executor.run(&words[..3]), Err(GridError::MalformedCommand { offset: 0, .. })));
}

#[test]
fn test_unknown_bank_kind_rejected() {
    init_tracing();
    let command = DeviceCommand {
        buffer_writes: vec![transfer(HOST_SRC, 1024, 1024, BankKind::Interleaved)],
        ..DeviceCommand::default()
    };
    let mut words = command.encode();
    words[8 + 7] = 5;
    let mut executor = DispatchExecutor::new(SoftwareNoc::new(), DispatchConfig::default());
    assert!(matches!(
        executor.run(&words),
        Err(GridError::MalformedCommand { offset: 15, .. })
    ));
}

#[test]
fn test_burst_larger_than_staging_rejected() {
    init_tracing();
    let config = DispatchConfig {
        staging_capacity: 1024,
        ..DispatchConfig::default()
    };
    let mut noc = noc_with_banks(&config);
    noc.write_node(SoftwareNoc::host_xy(), HOST_SRC, &pattern(4096)).unwrap();
    let command = DeviceCommand {
        buffer_writes: vec![transfer(HOST_SRC, 4096, 2048, BankKind::Interleaved)],
        ..DeviceCommand::default()
    };

    let mut executor = DispatchExecutor::new(noc, config);
    let err = executor.run(&command.encode()).unwrap_err();
    assert!(matches!(err, GridError::MalformedCommand { offset: 8, .. }));
    assert_eq!(executor.noc().stats().reads, 0);
}

#[test]
fn test_page_padding_wider_than_burst_rejected() {
    init_tracing();
    let config = DispatchConfig::default();
    let mut noc = noc_with_banks(&config);
    noc.write_node(SoftwareNoc::host_xy(), HOST_SRC, &pattern(1024)).unwrap();
    let mut write = transfer(HOST_SRC, 1024, 1024, BankKind::Interleaved);
    write.page_size = 4;
    write.padded_page_size = 0xFFFF_FF00;
    let command = DeviceCommand {
        buffer_writes: vec![write],
        ..DeviceCommand::default()
    };

    let mut executor = DispatchExecutor::new(noc, config);
    let err = executor.run(&command.encode()).unwrap_err();
    assert!(matches!(err, GridError::MalformedCommand { offset: 8, .. }));
    assert_eq!(executor.noc().stats().reads, 0);

    // The same record on the read side.
    let command = DeviceCommand {
        buffer_reads: vec![write],
        ..DeviceCommand::default()
    };
    let err = executor.run(&command.encode()).unwrap_err();
    assert!(matches!(err, GridError::MalformedCommand { offset: 8, .. }));
    assert_eq!(executor.noc().stats().reads, 0);
}

#[test]
fn test_remote_range_past_address_space_rejected() {
    init_tracing();
    let config = DispatchConfig::default();
    let command = DeviceCommand {
        buffer_writes: vec![
            transfer(HOST_SRC, 1024, 1024, BankKind::Interleaved),
            transfer(0xFFFF_FC00, 2048, 1024, BankKind::Interleaved),
        ],
        ..DeviceCommand::default()
    };

    let mut executor = DispatchExecutor::new(noc_with_banks(&config), config);
    let err = executor.run(&command.encode()).unwrap_err();
    // Second record starts after the header and the first record.
    assert!(matches!(err, GridError::MalformedCommand { offset: 16, .. }));
    assert_eq!(executor.noc().stats().reads, 1);
}

#[test]
fn test_multicast_receiver_mismatch_rejected() {
    init_tracing();
    let mut noc = SoftwareNoc::new();
    add_grid(&mut noc, CoreCoord::new(1, 1), CoreCoord::new(2, 1));
    let command = DeviceCommand {
        num_workers: 3,
        launch_groups: vec![LaunchGroup {
            dst_noc: noc_multicast_encoding((1, 1), (2, 1)),
            num_receivers: 3,
        }],
        ..DeviceCommand::default()
    };
    let mut executor = DispatchExecutor::new(noc, DispatchConfig::default());
    assert!(matches!(
        executor.run(&command.encode()),
        Err(GridError::TransferFailed { .. })
    ));
}
