use std::sync::Arc;
use std::thread;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use binix_net::events::{EventChannel, EventHub, RequestEventKind};
use binix_net::memory::BufferPool;
use binix_net::{HttpRequest, RequestState, VariantKey};

/// Enqueue then drain on one thread
fn benchmark_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_channel");

    for batch in [64usize, 1024] {
        group.bench_with_input(BenchmarkId::new("enqueue_drain", batch), &batch, |b, &batch| {
            let mut channel = EventChannel::new("bench");
            b.iter(|| {
                for i in 0..batch {
                    channel.enqueue(i);
                }
                let mut sum = 0usize;
                channel.drain_and_process(|i| sum += i);
                black_box(sum)
            })
        });
    }

    group.bench_function("four_producers_drain", |b| {
        let mut channel = EventChannel::new("bench");
        b.iter(|| {
            let queue = channel.queue();
            thread::scope(|scope| {
                for _ in 0..4 {
                    let queue = Arc::clone(&queue);
                    scope.spawn(move || {
                        for i in 0..256usize {
                            queue.push(i);
                        }
                    });
                }
            });
            black_box(channel.drain_and_process(|i| {
                black_box(i);
            }))
        })
    });

    group.finish();
}

/// Request records through the sender, as workers produce them
fn benchmark_request_records(c: &mut Criterion) {
    let mut hub = EventHub::new(BufferPool::default());
    let sender = hub.sender();
    let request = HttpRequest::get("https://example.com/").unwrap().into_handle();

    c.bench_function("request_records", |b| {
        b.iter(|| {
            for _ in 0..128 {
                sender.request(
                    Arc::clone(&request),
                    RequestEventKind::StateChange(RequestState::Processing),
                );
                sender.streaming_chunk(Arc::clone(&request), b"chunk of body bytes");
            }
            let buffers = sender.buffers().clone();
            hub.requests.drain_and_process(|event| {
                if let RequestEventKind::StreamingData(chunk) = event.kind {
                    buffers.release(chunk);
                }
            })
        })
    });
}

fn benchmark_variant_key(c: &mut Criterion) {
    let key = VariantKey::new("https", "example.com", 443, Some("http://proxy:3128".to_string()));
    let text = key.to_string();

    c.bench_function("variant_key_parse", |b| {
        b.iter(|| black_box(text.parse::<VariantKey>()))
    });
}

criterion_group!(
    benches,
    benchmark_channel,
    benchmark_request_records,
    benchmark_variant_key
);
criterion_main!(benches);
