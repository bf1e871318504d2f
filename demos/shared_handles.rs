use heed::EnvOpenOptions;
use heed_handles::{Environment, EnvironmentConfig, HeedGateway, OpenFlags};
use std::sync::{Arc, Barrier};
use std::thread;

type DemoResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;

fn main() -> DemoResult {
    let db_path = "/tmp/heed_handles_shared_example";
    if std::path::Path::new(db_path).exists() {
        std::fs::remove_dir_all(db_path)?;
    }
    std::fs::create_dir_all(db_path)?;

    let heed_env = unsafe {
        EnvOpenOptions::new()
            .map_size(10 * 1024 * 1024)
            .max_dbs(4)
            .open(db_path)?
    };
    let env = Environment::new(HeedGateway::new(heed_env, 4), EnvironmentConfig::default());

    println!("=== Sharing one database handle across threads ===\n");

    // The first open creates the database; it can be shared once committed
    let mut txn = env.write_txn()?;
    let events = env
        .database_options()
        .name("events")
        .flags(OpenFlags::CREATE)
        .open(&mut txn)?;
    txn.commit()?;
    println!("Opened 'events' ({} reference)", env.reference_count(Some("events")));

    const WORKER_COUNT: usize = 4;
    let barrier = Arc::new(Barrier::new(WORKER_COUNT));
    let mut workers = vec![];

    for worker_id in 1..=WORKER_COUNT {
        let env = env.clone();
        let barrier = Arc::clone(&barrier);

        workers.push(thread::spawn(move || -> DemoResult {
            barrier.wait();

            let mut txn = env.write_txn()?;
            let handle = env.database_options().name("events").open(&mut txn)?;
            let db = env.database(&handle)?;
            if let Some(wtxn) = txn.rw_txn() {
                let key = handle.encode(&format!("worker-{}", worker_id))?;
                db.put(wtxn, &key, b"done")?;
            }
            txn.commit()?;

            println!(
                "Worker {} wrote through a shared handle ({} references)",
                worker_id,
                env.reference_count(Some("events"))
            );
            handle.close()?;
            Ok(())
        }));
    }

    for worker in workers {
        worker.join().map_err(|_| "worker thread panicked")??;
    }

    let stats = env.stats();
    println!(
        "\nNative opens: {}, shared opens: {}, native closes: {}",
        stats.native_opens, stats.shared_opens, stats.native_closes
    );

    let txn = env.read_txn()?;
    let db = env.database(&events)?;
    println!("Entries in 'events': {}", db.len(txn.ro_txn())?);
    drop(txn);

    events.close()?;
    println!("'events' still open: {}", env.is_open(Some("events")));

    Ok(())
}
