//! INCR Transfer Benchmarks
//!
//! Measures chunk bookkeeping on its own and full cross-process conversions
//! (placeholder, chunk writes, property deletes) at various payload sizes.

use std::cell::RefCell;
use std::rc::Rc;

use btk_selection::prelude::*;
use btk_selection_core::{ChunkAssembler, IncrCursor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const CHUNK: usize = 262_144;

/// Generate a payload with a repeating pattern
fn generate_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Benchmark walking a payload and reassembling it without any transport
fn bench_chunk_bookkeeping(c: &mut Criterion) {
    let mut group = c.benchmark_group("incr_chunk_bookkeeping");

    for (len, name) in [(64 * 1024, "64KiB"), (1024 * 1024, "1MiB"), (8 * 1024 * 1024, "8MiB")] {
        let payload = generate_payload(len);
        group.throughput(Throughput::Bytes(len as u64));

        group.bench_with_input(BenchmarkId::new("cursor_assembler", name), &payload, |b, payload| {
            b.iter(|| {
                let mut cursor = IncrCursor::new(payload.len());
                let mut assembler = ChunkAssembler::new();
                while let Some(span) = cursor.next_chunk(CHUNK) {
                    assembler.append(&payload[span]);
                }
                black_box(assembler.finish())
            });
        });
    }

    group.finish();
}

/// Two applications sharing one display server, owner serving `payload`.
struct Transfer {
    main_loop: MainLoop,
    requestor_ctx: SelectionContext,
    requestor: Widget,
    received: Rc<RefCell<Option<usize>>>,
    _owner_ctx: SelectionContext,
    _owner: Widget,
}

impl Transfer {
    fn new(payload: Vec<u8>) -> Self {
        let factory = BackendFactory::new(BackendKind::X11);
        let main_loop = MainLoop::with_virtual_clock();

        let owner_ctx = SelectionContext::new(main_loop.clone());
        let owner_display = owner_ctx.open_display(factory.connect());
        let owner = Widget::new(&owner_ctx, &owner_display);
        owner.realize();
        owner_ctx.selection_add_target(&owner, atoms::PRIMARY, atoms::UTF8_STRING, 0);
        owner.connect_selection_get(move |_, data, _, _| data.set(data.target(), 8, &payload));
        owner_ctx.selection_owner_set(&owner_display, Some(&owner), atoms::PRIMARY, CURRENT_TIME);

        let requestor_ctx = SelectionContext::new(main_loop.clone());
        let requestor_display = requestor_ctx.open_display(factory.connect());
        let requestor = Widget::new(&requestor_ctx, &requestor_display);
        requestor.realize();
        let received = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&received);
        requestor.connect_selection_received(move |_, data, _| {
            *slot.borrow_mut() = Some(data.data().len());
        });

        Self {
            main_loop,
            requestor_ctx,
            requestor,
            received,
            _owner_ctx: owner_ctx,
            _owner: owner,
        }
    }

    fn run(&self) -> usize {
        self.received.borrow_mut().take();
        self.requestor_ctx
            .selection_convert(&self.requestor, atoms::PRIMARY, atoms::UTF8_STRING, CURRENT_TIME);
        let received = Rc::clone(&self.received);
        self.main_loop.run_until(move || received.borrow().is_some());
        self.received.borrow().unwrap_or(0)
    }
}

/// Benchmark a complete conversion between two applications
fn bench_cross_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("incr_cross_process");
    group.sample_size(20);

    // 128KiB fits one property; the rest go through INCR
    for (len, name) in [(128 * 1024, "128KiB"), (1024 * 1024, "1MiB"), (4 * 1024 * 1024, "4MiB")] {
        let transfer = Transfer::new(generate_payload(len));
        group.throughput(Throughput::Bytes(len as u64));

        group.bench_function(BenchmarkId::new("convert", name), |b| {
            b.iter(|| black_box(transfer.run()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chunk_bookkeeping, bench_cross_process);
criterion_main!(benches);
