use cadenza_engine::parser::Lexer;
use cadenza_engine::{parse_interpreter, Pipeline, PipelineConfig, ThreadContext};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const LOOP: &str = "var i = 0, sum = 0; while({ i < 100 }, { sum = sum + i; i = i + 1 }); sum";
const BRANCHES: &str = "var x = 3, y; if(x < 5, { y = x + 10 }, { y = x - 10 }); \
                        if(y < 0, { y = 0 }); y";
const CLOSURES: &str = "var a = 1, b = 2; { arg c; { a + b + c }.value }.value(3)";

fn bench_lexer(c: &mut Criterion) {
    let source = LOOP.repeat(20);
    let mut group = c.benchmark_group("lexer");
    group.throughput(Throughput::Bytes(source.len() as u64));
    group.bench_function("loop_x20", |b| {
        b.iter(|| Lexer::new(black_box(&source)).tokenize().unwrap());
    });
    group.finish();
}

fn bench_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser");
    for (name, source) in [("loop", LOOP), ("branches", BRANCHES), ("closures", CLOSURES)] {
        group.bench_with_input(BenchmarkId::new("parse", name), &source, |b, source| {
            b.iter(|| parse_interpreter(black_box(source)).unwrap());
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for registers in [16, 32] {
        let pipeline = Pipeline::new(PipelineConfig::default().with_registers(registers));
        for (name, source) in [("loop", LOOP), ("branches", BRANCHES), ("closures", CLOSURES)] {
            group.bench_with_input(
                BenchmarkId::new(format!("{}_registers", registers), name),
                &source,
                |b, source| {
                    let mut context = ThreadContext::new().unwrap();
                    b.iter(|| pipeline.compile_code(&mut context, black_box(source)).unwrap());
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_lexer, bench_parser, bench_compile);
criterion_main!(benches);
