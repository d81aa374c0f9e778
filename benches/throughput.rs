use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use growqueue_rs::{BufferedQueue, GrowList};
use std::sync::Arc;
use std::thread;

const ITEMS_PER_THREAD: usize = 100_000;

fn bench_list_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_append");

    for threads in [1usize, 4, 16] {
        group.throughput(Throughput::Elements((threads * ITEMS_PER_THREAD) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &threads| {
                b.iter(|| {
                    let list = Arc::new(GrowList::with_capacity(16));
                    let handles: Vec<_> = (0..threads)
                        .map(|id| {
                            let list = Arc::clone(&list);
                            thread::spawn(move || {
                                for _ in 0..ITEMS_PER_THREAD {
                                    list.push(id as u64).unwrap();
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                    black_box(list.len());
                });
            },
        );
    }

    group.finish();
}

fn bench_queue_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_enqueue");

    for threads in [1usize, 4, 16] {
        group.throughput(Throughput::Elements((threads * ITEMS_PER_THREAD) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &threads| {
                b.iter(|| {
                    let queue = Arc::new(BufferedQueue::new());
                    let handles: Vec<_> = (0..threads)
                        .map(|id| {
                            let queue = Arc::clone(&queue);
                            thread::spawn(move || {
                                for _ in 0..ITEMS_PER_THREAD {
                                    queue.enqueue(id as u64);
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                    black_box(&queue);
                });
            },
        );
    }

    group.finish();
}

fn bench_queue_mpmc(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_mpmc");
    group.throughput(Throughput::Elements((4 * ITEMS_PER_THREAD) as u64));

    group.bench_function("4p4c", |b| {
        b.iter(|| {
            let queue = Arc::new(BufferedQueue::new());

            let producers: Vec<_> = (0..4)
                .map(|id| {
                    let queue = Arc::clone(&queue);
                    thread::spawn(move || {
                        for _ in 0..ITEMS_PER_THREAD {
                            queue.enqueue(id as u64);
                        }
                    })
                })
                .collect();

            let consumers: Vec<_> = (0..4)
                .map(|_| {
                    let queue = Arc::clone(&queue);
                    thread::spawn(move || {
                        let mut taken = 0usize;
                        while taken < ITEMS_PER_THREAD {
                            if let Some(item) = queue.try_dequeue() {
                                black_box(item);
                                taken += 1;
                            } else {
                                std::hint::spin_loop();
                            }
                        }
                    })
                })
                .collect();

            for handle in producers {
                handle.join().unwrap();
            }
            for handle in consumers {
                handle.join().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_list_append,
    bench_queue_enqueue,
    bench_queue_mpmc
);
criterion_main!(benches);
