//! Benchmarks for scheduling policies and buffer migration.
//!
//! Run with: cargo bench -p hetsched_runtime --bench scheduler_ops

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use hetsched_runtime::backend::ProgramObject;
use hetsched_runtime::device::DeviceIdAllocator;
use hetsched_runtime::{
    Backend, Buffer, Device, DeviceRegistry, DeviceType, HostBackend, HostDeviceSpec,
    KernelLibrary, Program, ProgramSource, Runtime, Score, SchedulerPolicy, Task,
};

struct Fixture {
    registry: DeviceRegistry,
    program: Arc<Program>,
}

fn fixture() -> Fixture {
    let backend = HostBackend::new(vec![
        HostDeviceSpec::cpu("cpu", 4),
        HostDeviceSpec::gpu("gpu", 16),
    ]);
    let backends: Vec<Arc<dyn Backend>> = vec![Arc::new(backend)];
    let registry = DeviceRegistry::discover(&backends, &DeviceIdAllocator::new()).unwrap();

    let source = ProgramSource::from(KernelLibrary::new().with_kernel("noop", |_| Ok(())));
    let objects: Vec<_> = registry
        .all()
        .iter()
        .map(|d| {
            let object: Arc<dyn ProgramObject> = backends[0].compile(d, &source, None).unwrap();
            (d.id(), d.device_type(), object)
        })
        .collect();

    Fixture {
        registry,
        program: Arc::new(Program::from_objects(objects)),
    }
}

fn random_tasks(program: &Arc<Program>, n: usize, seed: u64) -> Vec<Task> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let score = Score::new(rng.gen_range(0.1..10.0), rng.gen_range(0.1..10.0));
            Task::new(program.clone()).with_score(score)
        })
        .collect()
}

fn bench_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_pop");
    let fixture = fixture();
    let devices: Vec<&Arc<Device>> = fixture.registry.all().iter().collect();

    for policy in SchedulerPolicy::ALL {
        for n in [64usize, 1024] {
            group.throughput(Throughput::Elements(n as u64));
            group.bench_with_input(
                BenchmarkId::new(policy.to_string(), n),
                &n,
                |bench, &n| {
                    bench.iter_batched(
                        || random_tasks(&fixture.program, n, 42),
                        |tasks| {
                            let scheduler = policy.build();
                            for task in tasks {
                                scheduler.push(task).unwrap();
                            }
                            let mut popped = 0;
                            while scheduler.has_work() {
                                for device in &devices {
                                    if scheduler.pop(device).is_some() {
                                        popped += 1;
                                    }
                                }
                            }
                            black_box(popped)
                        },
                        criterion::BatchSize::SmallInput,
                    )
                },
            );
        }
    }

    group.finish();
}

fn bench_buffer_migration(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_migration");
    let fixture = fixture();
    let cpu = fixture.registry.of_type(DeviceType::Cpu).next().unwrap().clone();
    let gpu = fixture.registry.of_type(DeviceType::Gpu).next().unwrap().clone();

    for size in [1024usize, 65536, 1048576] {
        let buffer = Buffer::new(size).unwrap();
        buffer.set_source(vec![7u8; size]).unwrap();
        buffer.bind(&cpu).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("ping_pong", size), &size, |bench, _| {
            let mut on_gpu = false;
            bench.iter(|| {
                let target = if on_gpu { &cpu } else { &gpu };
                on_gpu = !on_gpu;
                black_box(buffer.bind(target).unwrap())
            })
        });
    }

    group.finish();
}

fn bench_runtime_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("runtime");
    group.sample_size(20);

    for policy in SchedulerPolicy::ALL {
        let runtime = Runtime::builder()
            .with_policy(policy)
            .with_host_device(HostDeviceSpec::cpu("cpu", 4))
            .with_host_device(HostDeviceSpec::gpu("gpu", 16))
            .build()
            .unwrap();
        let program = Program::compile(
            &runtime,
            KernelLibrary::new().with_kernel("noop", |_| Ok(())),
            None,
        )
        .unwrap();

        group.throughput(Throughput::Elements(256));
        group.bench_function(BenchmarkId::new("submit_finish", policy), |bench| {
            bench.iter(|| {
                for task in random_tasks(&program, 256, 7) {
                    runtime.submit(task.with_kernel("noop")).unwrap();
                }
                runtime.finish().unwrap();
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_push_pop,
    bench_buffer_migration,
    bench_runtime_throughput,
);
criterion_main!(benches);
