use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use member_ledger::{
    import::{ImportOptions, TableImporter},
    resolve::IdentityResolver,
    schema::infer_columns,
    store::Store,
};

const FIRST: [&str; 8] = ["John", "Jane", "Ann", "Mary", "Peter", "Sofia", "Omar", "Lena"];
const LAST: [&str; 8] = ["Doe", "Smith", "Lee", "Watson", "Okafor", "Novak", "Haddad", "Berg"];

fn generate_members(rows: usize) -> String {
    let mut csv = String::from("member_number,first_name,last_name,paid\n");
    for i in 0..rows {
        let first = FIRST[i % FIRST.len()];
        let last = LAST[(i / FIRST.len()) % LAST.len()];
        csv.push_str(&format!("{i},{first}{i},{last},{}.{:02}\n", i % 90, i % 100));
    }
    csv
}

fn seeded_store(rows: usize) -> Store {
    let store = Store::open_in_memory().expect("in-memory store");
    TableImporter::new(&store, "members")
        .import(generate_members(rows).as_bytes(), "bench", &ImportOptions::default())
        .expect("seed members");
    store
}

fn bench_inference(c: &mut Criterion) {
    let csv = generate_members(2_000);
    let mut lines = csv.lines();
    let headers: Vec<String> = lines
        .next()
        .expect("header")
        .split(',')
        .map(str::to_string)
        .collect();
    let rows: Vec<Vec<String>> = lines
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect();

    let mut group = c.benchmark_group("import");
    group.bench_function("infer_2000_rows", |b| {
        b.iter(|| infer_columns(&headers, &rows).expect("infer"))
    });
    group.bench_function("import_2000_rows", |b| {
        b.iter_batched(
            || Store::open_in_memory().expect("store"),
            |store| {
                TableImporter::new(&store, "members")
                    .import(csv.as_bytes(), "bench", &ImportOptions::default())
                    .expect("import")
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let store = seeded_store(2_000);
    let resolver = IdentityResolver::new(&store, "members");

    let mut group = c.benchmark_group("resolve");
    group.bench_function("exact_hit", |b| {
        b.iter(|| resolver.resolve("John8 Smith", false).expect("resolve"))
    });
    group.bench_function("initial_hit", |b| {
        b.iter(|| resolver.resolve("P Doe", false).expect("resolve"))
    });
    group.bench_function("fuzzy_fallback", |b| {
        b.iter(|| resolver.resolve("Sofia5O Doh", false).expect("resolve"))
    });
    group.finish();
}

criterion_group!(benches, bench_inference, bench_resolution);
criterion_main!(benches);
