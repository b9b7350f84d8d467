use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use hireflow_mail::text::html_to_text;
use hireflow_mail::{placeholders, render, MissingVariable, Variables};

fn variables(n: usize) -> Variables {
    (0..n).map(|i| (format!("var{i}"), format!("value number {i}"))).collect()
}

fn template_body(n: usize) -> String {
    let mut body = String::from("<html><body><h1>Hello {{ name }}</h1>");
    for i in 0..n {
        body.push_str(&format!("<p>Line {i}: {{{{var{i}}}}} and {{{{ missing{i} }}}}</p>"));
    }
    body.push_str("</body></html>");
    body
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");

    for size in [10usize, 100, 1000] {
        let body = template_body(size);
        let vars = variables(size);
        group.throughput(Throughput::Bytes(body.len() as u64));

        group.bench_with_input(BenchmarkId::new("keep_missing", size), &size, |b, _| {
            b.iter(|| render(black_box(&body), black_box(&vars), MissingVariable::Keep));
        });

        group.bench_with_input(BenchmarkId::new("empty_missing", size), &size, |b, _| {
            b.iter(|| render(black_box(&body), black_box(&vars), MissingVariable::Empty));
        });
    }

    group.finish();
}

fn bench_placeholders(c: &mut Criterion) {
    let body = template_body(200);
    c.bench_function("placeholders_200", |b| {
        b.iter(|| placeholders(black_box(&body)));
    });
}

fn bench_html_to_text(c: &mut Criterion) {
    let body = render(&template_body(200), &variables(200), MissingVariable::Empty);
    c.bench_function("html_to_text_200", |b| {
        b.iter(|| html_to_text(black_box(&body)));
    });
}

criterion_group!(benches, bench_render, bench_placeholders, bench_html_to_text);
criterion_main!(benches);
