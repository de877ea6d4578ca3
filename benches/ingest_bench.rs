use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tempfile::tempdir;
use tokio::runtime::Runtime;
use uuid::Uuid;

use gastobot_server::database::{Db, init_db};
use gastobot_server::expenses::{compute_file_hash, find_duplicate_by_fingerprint};

// Benchmark constants
const BENCH_BASE_TIMESTAMP: i64 = 1700000000;
const BENCH_EXPENSE_COUNT: usize = 1000;
const DAY: i64 = 24 * 60 * 60;

async fn setup_benchmark_environment() -> (Db, String) {
    let temp_dir = tempdir().expect("Failed to create temporary directory");
    let data_path = temp_dir.path().to_str().unwrap().to_string();
    let user_id = Uuid::new_v4().to_string();

    let db = init_db(&data_path).await.unwrap();
    {
        let conn = db.write().await;
        conn.execute(
            "INSERT INTO users (id, email, password_hash, name, currency, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            (
                user_id.as_str(),
                "bench@example.com",
                "hash",
                "Bench User",
                "MXN",
                BENCH_BASE_TIMESTAMP,
            ),
        )
        .await
        .unwrap();
    }

    // Keep temp_dir alive for the whole benchmark run
    std::mem::forget(temp_dir);

    (db, user_id)
}

async fn create_benchmark_expenses(db: &Db, user_id: &str, count: usize) {
    let conn = db.write().await;

    for i in 0..count {
        let expense_id = Uuid::new_v4().to_string();
        let date = BENCH_BASE_TIMESTAMP + (i as i64) * DAY / 4;
        let amount = format!("{}.00", 10 + (i % 100));
        let description = format!("Benchmark Expense {}", i);

        conn.execute(
            "INSERT INTO expenses (id, user_id, amount, currency, description, category_id, date, source, raw_input, file_hash, created_at)
             VALUES (?, ?, ?, ?, ?, NULL, ?, 'text', NULL, NULL, ?)",
            (
                expense_id.as_str(),
                user_id,
                amount.as_str(),
                "MXN",
                description.as_str(),
                date,
                date,
            ),
        )
        .await
        .unwrap();
    }
}

async fn benchmark_fingerprint_lookup(db: &Db, user_id: &str) {
    let conn = db.read().await;
    let date = BENCH_BASE_TIMESTAMP + 500 * DAY / 4;
    let result = find_duplicate_by_fingerprint(&conn, "55.00", "MXN", date, user_id)
        .await
        .unwrap();
    black_box(result);
}

async fn benchmark_recent_query(db: &Db, user_id: &str) {
    let conn = db.read().await;
    let mut rows = conn
        .query(
            "SELECT id, amount, currency, date FROM expenses WHERE user_id = ? ORDER BY date DESC LIMIT 100",
            [user_id],
        )
        .await
        .unwrap();

    let mut count = 0;
    while let Some(_row) = rows.next().await.unwrap() {
        count += 1;
    }
    black_box(count);
}

fn benchmark_file_hash(payload: &[u8]) {
    black_box(compute_file_hash(payload));
}

fn criterion_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    // Setup benchmark data once
    let (db, user_id) = rt.block_on(setup_benchmark_environment());
    rt.block_on(create_benchmark_expenses(&db, &user_id, BENCH_EXPENSE_COUNT));

    c.bench_function("fingerprint_lookup", |b| {
        b.to_async(&rt)
            .iter(|| benchmark_fingerprint_lookup(&db, &user_id))
    });

    c.bench_function("recent_expenses_query", |b| {
        b.to_async(&rt).iter(|| benchmark_recent_query(&db, &user_id))
    });

    let receipt = vec![0xABu8; 256 * 1024];
    c.bench_function("file_hash_256kb", |b| {
        b.iter(|| benchmark_file_hash(&receipt))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
