// Several independent handles on one ledger file, as separate processes would hold

use gas2influx_ledger::{Admission, Ledger, SqliteLedger};
use std::sync::Arc;
use std::time::Duration;

fn file_name(handle: usize, file: usize) -> String {
    format!("2016100{}_{:02}.csv", (handle + file) % 4 + 1, file)
}

async fn open(path: &std::path::Path) -> SqliteLedger {
    SqliteLedger::open(path, Duration::from_secs(10), Duration::from_secs(5))
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_handles_admit_each_identifier_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");

    let mut handles: Vec<Arc<dyn Ledger>> = Vec::new();
    for _ in 0..4 {
        handles.push(Arc::new(open(&path).await));
    }

    let mut tasks = Vec::new();
    for (i, ledger) in handles.iter().enumerate() {
        for file in 0..8 {
            let ledger = Arc::clone(ledger);
            let identifier = file_name(i, file);
            tasks.push(tokio::spawn(async move {
                (identifier.clone(), ledger.admit(&identifier).await.unwrap())
            }));
        }
    }

    let mut admitted = std::collections::HashMap::new();
    for task in tasks {
        let (identifier, admission) = task.await.unwrap();
        if admission == Admission::Admitted {
            *admitted.entry(identifier).or_insert(0) += 1;
        }
    }

    // Handles overlap on most identifiers
    assert!(admitted.values().all(|&count| count == 1));
    let distinct: std::collections::HashSet<_> = (0..4)
        .flat_map(|i| (0..8).map(move |file| file_name(i, file)))
        .collect();
    assert_eq!(admitted.len(), distinct.len());

    for identifier in &distinct {
        assert!(handles[0].is_admitted(identifier).await.unwrap());
    }
}

#[tokio::test]
async fn is_admitted_does_not_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let ledger = open(&path).await;

    assert!(!ledger.is_admitted("20160930.csv").await.unwrap());
    assert!(!ledger.is_admitted("20160930.csv").await.unwrap());
    assert_eq!(
        ledger.admit("20160930.csv").await.unwrap(),
        Admission::Admitted
    );
}
