use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::runtime::Runtime;

use idrepo_core::{Entity, IdentifiedEntity};
use idrepo_infra::{
    CancellationSignal, InMemoryBackend, InMemoryDatabase, Predicate, Record, Repository,
    RepositoryConfig, Session, TrackingMode,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Account {
    id: i64,
    owner: String,
    balance: i64,
}

impl Entity for Account {
    const DISPLAY_NAME: Option<&'static str> = Some("{type} {owner}");

    fn field_value(&self, name: &str) -> Option<String> {
        match name {
            "owner" => Some(self.owner.clone()),
            _ => None,
        }
    }
}

impl IdentifiedEntity for Account {
    type Id = i64;

    fn id(&self) -> &i64 {
        &self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

impl Record for Account {
    const TABLE: &'static str = "accounts";
}

fn runtime() -> anyhow::Result<Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

fn seeded(rows: i64) -> anyhow::Result<InMemoryDatabase> {
    let db = InMemoryDatabase::new();
    for id in 1..=rows {
        db.put(
            Account::TABLE,
            json!({"id": id, "owner": format!("owner-{id}"), "balance": id * 10}),
        )?;
    }
    Ok(db)
}

fn bench_add_item(c: &mut Criterion) {
    let rt = runtime().unwrap();
    let repo = Repository::new(RepositoryConfig::default());
    let cancel = CancellationSignal::new();

    c.bench_function("add_item_generated_id", |b| {
        let db = InMemoryDatabase::new();
        b.iter(|| {
            let mut session = Session::new(InMemoryBackend::new(db.clone()));
            let account = Account {
                owner: black_box("bench".to_string()),
                ..Account::default()
            };
            black_box(rt.block_on(repo.add_item(&mut session, account, &cancel)).unwrap());
        });
    });
}

fn bench_get_by_id(c: &mut Criterion) {
    let rt = runtime().unwrap();
    let repo = Repository::new(RepositoryConfig::default());
    let cancel = CancellationSignal::new();
    let db = seeded(1_000).unwrap();

    let mut group = c.benchmark_group("get_by_id");
    for mode in [
        TrackingMode::TrackAll,
        TrackingMode::NoTracking,
        TrackingMode::NoTrackingWithIdentityResolution,
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(mode), &mode, |b, &mode| {
            let mut session = Session::new(InMemoryBackend::new(db.clone()));
            b.iter(|| {
                black_box(
                    rt.block_on(repo.get_by_id::<Account, _>(&mut session, &black_box(500), mode, &cancel))
                        .unwrap(),
                );
            });
        });
    }
    group.finish();
}

fn bench_filtered_query(c: &mut Criterion) {
    let rt = runtime().unwrap();
    let repo = Repository::new(RepositoryConfig::default());
    let cancel = CancellationSignal::new();

    let mut group = c.benchmark_group("filtered_query");
    for rows in [10i64, 100, 1_000] {
        group.throughput(Throughput::Elements(rows as u64));
        let db = seeded(rows).unwrap();
        group.bench_with_input(BenchmarkId::new("scan", rows), &rows, |b, &rows| {
            let mut session = Session::new(InMemoryBackend::new(db.clone()));
            b.iter(|| {
                let query = repo
                    .query::<Account, _>(&mut session, TrackingMode::NoTracking)
                    .filter(Predicate::ge("balance", rows * 5))
                    .filter(Predicate::ne("owner", "owner-1"));
                black_box(rt.block_on(query.count(&cancel)).unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_add_item, bench_get_by_id, bench_filtered_query);
criterion_main!(benches);
