//! End-to-end tests driving a full runtime over simulated host devices.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use hetsched_runtime::prelude::*;
use hetsched_runtime::{HostBridge, RuntimeBuilder, WorkerStatus};

fn increment(ctx: &mut HostKernelContext<'_>) -> RuntimeResult<()> {
    let mut data = ctx.buffer(0)?;
    for i in 0..ctx.range().len() {
        if let Some(v) = data.get::<i32>(i) {
            data.set(i, v + 1);
        }
    }
    Ok(())
}

fn saxpy(ctx: &mut HostKernelContext<'_>) -> RuntimeResult<()> {
    let a = ctx.f32(2)?;
    let x = ctx.buffer(0)?;
    let mut y = ctx.buffer(1)?;
    for i in 0..ctx.range().len() {
        if let (Some(xi), Some(yi)) = (x.get::<f32>(i), y.get::<f32>(i)) {
            y.set(i, a * xi + yi);
        }
    }
    Ok(())
}

fn library() -> KernelLibrary {
    KernelLibrary::new()
        .with_kernel("increment", increment)
        .with_kernel("saxpy", saxpy)
}

fn cpu_gpu() -> RuntimeBuilder {
    Runtime::builder()
        .with_host_device(HostDeviceSpec::cpu("cpu", 4))
        .with_host_device(HostDeviceSpec::gpu("gpu", 16))
}

fn increment_task(program: &Arc<Program>, buffer: &Arc<Buffer>) -> Task {
    let buffer = buffer.clone();
    Task::new(program.clone())
        .with_kernel("increment")
        .on_config(move |_, kernels| {
            kernels.kernel("increment")?.set_input(&buffer)?;
            Ok(())
        })
}

#[test]
fn test_increment_under_fcfs() {
    let runtime = cpu_gpu().with_policy(SchedulerPolicy::Fcfs).build().unwrap();
    let program = Program::compile(&runtime, library(), None).unwrap();

    let buffer = Buffer::for_elements(ElementType::Int, 4, 1, 1).unwrap();
    buffer.set_elements(&[1i32, 2, 3, 4]).unwrap();

    runtime.submit(increment_task(&program, &buffer)).unwrap();
    runtime.finish().unwrap();

    assert_eq!(buffer.to_vec_of::<i32>().unwrap(), vec![2, 3, 4, 5]);
    assert!(!runtime.has_work());
    assert!(!runtime.has_work());
}

#[test]
fn test_completion_callback_reads_results() {
    let runtime = cpu_gpu().with_policy(SchedulerPolicy::Pams).build().unwrap();
    let program = Program::compile(&runtime, library(), None).unwrap();

    let x = Buffer::for_elements(ElementType::Float, 8, 1, 1).unwrap();
    let y = Buffer::for_elements(ElementType::Float, 8, 1, 1).unwrap();
    x.set_elements(&[1.0f32; 8]).unwrap();
    y.set_elements(&[0.5f32; 8]).unwrap();

    let result = Arc::new(Mutex::new(Vec::new()));
    let (xc, yc, out) = (x.clone(), y.clone(), result.clone());
    let y_done = y.clone();
    let task = Task::new(program)
        .with_kernel("saxpy")
        .on_config(move |_, kernels| {
            kernels
                .kernel("saxpy")?
                .set_input(&xc)?
                .set_output(&yc)?
                .set_scalar(2, 2.0f32)?;
            Ok(())
        })
        .on_complete(move |_, _| {
            *out.lock() = y_done.to_vec_of::<f32>()?;
            Ok(())
        });

    runtime.submit(task).unwrap();
    runtime.finish().unwrap();

    assert_eq!(*result.lock(), vec![2.5f32; 8]);
    // x was only read; its pending data was uploaded once and never copied back.
    assert_eq!(x.transfer_stats().h2d_count, 1);
    assert_eq!(x.transfer_stats().d2d_count, 0);
}

#[test]
fn test_buffer_follows_tasks_across_devices() {
    let runtime = cpu_gpu().build().unwrap();
    let on_cpu = Program::compile(&runtime, library().restrict_to([DeviceType::Cpu]), None).unwrap();
    let on_gpu = Program::compile(&runtime, library().restrict_to([DeviceType::Gpu]), None).unwrap();
    let cpu_id = runtime.registry().of_type(DeviceType::Cpu).next().unwrap().id();
    let gpu_id = runtime.registry().of_type(DeviceType::Gpu).next().unwrap().id();

    let buffer = Buffer::for_elements(ElementType::Int, 4, 1, 1).unwrap();
    buffer.set_elements(&[10i32, 20, 30, 40]).unwrap();

    runtime.submit(increment_task(&on_cpu, &buffer)).unwrap();
    runtime.finish().unwrap();
    assert_eq!(buffer.device_id(), Some(cpu_id));

    runtime.submit(increment_task(&on_gpu, &buffer)).unwrap();
    runtime.finish().unwrap();
    assert_eq!(buffer.device_id(), Some(gpu_id));

    assert_eq!(buffer.to_vec_of::<i32>().unwrap(), vec![12, 22, 32, 42]);
    let stats = buffer.transfer_stats();
    assert_eq!(stats.h2d_count, 1);
    assert_eq!(stats.d2d_count, 1);
    assert_eq!(stats.d2d_bytes, 16);
}

#[test]
fn test_fresh_source_replaces_migrated_data() {
    let runtime = cpu_gpu().build().unwrap();
    let on_cpu = Program::compile(&runtime, library().restrict_to([DeviceType::Cpu]), None).unwrap();
    let on_gpu = Program::compile(&runtime, library().restrict_to([DeviceType::Gpu]), None).unwrap();

    let buffer = Buffer::for_elements(ElementType::Int, 4, 1, 1).unwrap();
    buffer.set_elements(&[1i32, 1, 1, 1]).unwrap();
    runtime.submit(increment_task(&on_cpu, &buffer)).unwrap();
    runtime.finish().unwrap();

    buffer.set_elements(&[100i32, 200, 300, 400]).unwrap();
    runtime.submit(increment_task(&on_gpu, &buffer)).unwrap();
    runtime.finish().unwrap();

    assert_eq!(buffer.to_vec_of::<i32>().unwrap(), vec![101, 201, 301, 401]);
    assert_eq!(buffer.transfer_stats().d2d_count, 0);
}

#[test]
fn test_failures_surface_at_finish() {
    let runtime = cpu_gpu().build().unwrap();
    let lib = library()
        .with_kernel("fail", |ctx| {
            Err(RuntimeError::kernel_execution("fail", ctx.device(), "bad input"))
        })
        .with_kernel("panic", |_| panic!("kernel exploded"));
    let program = Program::compile(&runtime, lib, None).unwrap();

    let buffer = Buffer::for_elements(ElementType::Int, 4, 1, 1).unwrap();
    buffer.set_elements(&[0i32; 4]).unwrap();

    runtime
        .submit(Task::new(program.clone()).with_label("fails").with_kernel("fail"))
        .unwrap();
    runtime
        .submit(Task::new(program.clone()).with_label("panics").with_kernel("panic"))
        .unwrap();
    runtime.submit(increment_task(&program, &buffer)).unwrap();

    let mut failures = match runtime.finish() {
        Err(RuntimeError::TasksFailed { failures }) => failures,
        other => panic!("expected TasksFailed, got {other:?}"),
    };
    failures.sort_by(|a, b| a.label.cmp(&b.label));
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].label, "fails");
    assert!(matches!(failures[0].error, RuntimeError::KernelExecution { .. }));
    assert_eq!(failures[1].label, "panics");
    assert!(matches!(
        &failures[1].error,
        RuntimeError::TaskPanicked { message, .. } if message == "kernel exploded"
    ));

    // The other task still ran, and failures are reported once.
    assert_eq!(buffer.to_vec_of::<i32>().unwrap(), vec![1, 1, 1, 1]);
    assert_eq!(runtime.completed_count(), 3);
    runtime.finish().unwrap();

    for (_, status) in runtime.worker_states() {
        assert_ne!(status, WorkerStatus::Killed);
    }
}

#[test]
fn test_unknown_kernel_name_fails_task() {
    let runtime = cpu_gpu().build().unwrap();
    let program = Program::compile(&runtime, library(), None).unwrap();

    runtime
        .submit(Task::new(program).with_kernel("does_not_exist"))
        .unwrap();
    let err = runtime.finish().unwrap_err();
    assert!(matches!(err, RuntimeError::TasksFailed { ref failures } if failures.len() == 1));
}

#[test]
fn test_drop_drains_queued_tasks() {
    let ran = Arc::new(AtomicUsize::new(0));
    {
        let runtime = cpu_gpu().with_policy(SchedulerPolicy::Fcfs).build().unwrap();
        let counter = ran.clone();
        let lib = KernelLibrary::new().with_kernel("count", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let program = Program::compile(&runtime, lib, None).unwrap();
        for _ in 0..50 {
            runtime
                .submit(Task::new(program.clone()).with_kernel("count"))
                .unwrap();
        }
    }
    assert_eq!(ran.load(Ordering::SeqCst), 50);
}

struct RecordingBridge {
    attached: Mutex<Vec<DeviceId>>,
    detached: AtomicUsize,
}

impl HostBridge for RecordingBridge {
    fn attach(&self, device: &Device) -> RuntimeResult<()> {
        self.attached.lock().push(device.id());
        Ok(())
    }

    fn detach(&self, _device: &Device) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_host_bridge_once_per_worker() {
    let bridge = Arc::new(RecordingBridge {
        attached: Mutex::new(Vec::new()),
        detached: AtomicUsize::new(0),
    });
    let runtime = cpu_gpu()
        .with_host_device(HostDeviceSpec::accelerator("npu", 2))
        .with_host_bridge(bridge.clone())
        .build()
        .unwrap();

    let program = Program::compile(&runtime, library(), None).unwrap();
    for _ in 0..10 {
        let buffer = Buffer::for_elements(ElementType::Int, 2, 1, 1).unwrap();
        buffer.set_elements(&[0i32, 0]).unwrap();
        runtime.submit(increment_task(&program, &buffer)).unwrap();
    }
    runtime.finish().unwrap();

    let mut attached = bridge.attached.lock().clone();
    attached.sort();
    assert_eq!(attached, vec![DeviceId::new(0), DeviceId::new(1), DeviceId::new(2)]);

    drop(runtime);
    assert_eq!(bridge.detached.load(Ordering::SeqCst), 3);
}

#[test]
fn test_runtime_from_config() {
    let config = RuntimeConfig::from_json(
        r#"{
            "scheduler": "heft",
            "host_devices": [
                { "name": "cpu", "device_type": "cpu", "compute_units": 2 },
                { "name": "gpu", "device_type": "gpu", "compute_units": 8 }
            ]
        }"#,
    )
    .unwrap();
    let runtime = Runtime::from_config(config).unwrap();

    assert_eq!(runtime.scheduler_name(), "heft");
    assert_eq!(runtime.devices().len(), 2);
    assert_eq!(runtime.devices()[1].device_type(), DeviceType::Gpu);
}
