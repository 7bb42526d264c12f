use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use portscan_svc::engine::ScanEngine;
use portscan_svc::orchestrator::ScanOrchestrator;
use portscan_svc::store::{MemoryReportStore, ReportStore};
use portscan_svc::types::{HostScan, PortInfo, ScanProfile, ScanRequest, ScanResult, ScanStatus};
use portscan_svc::Result;

/// Returns one open http port for whatever host it is asked about, and
/// records the calls it received.
#[derive(Default)]
struct StubEngine {
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl ScanEngine for StubEngine {
    async fn scan(&self, host: &str, args: &[String]) -> Result<ScanResult> {
        self.calls
            .lock()
            .unwrap()
            .push((host.to_string(), args.to_vec()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut h = HostScan {
            address: host.to_string(),
            state: "up".into(),
            ..Default::default()
        };
        h.protocol_mut("tcp")
            .ports
            .insert(80, PortInfo::new("open").service("http"));
        Ok(ScanResult {
            hosts: vec![h],
            stats: None,
        })
    }
}

async fn wait_idle(o: &ScanOrchestrator) -> ScanStatus {
    for _ in 0..300 {
        let s = o.status();
        if !s.running {
            return s;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("scan never finished");
}

#[tokio::test]
async fn basic_scan_end_to_end() {
    let engine = Arc::new(StubEngine::default());
    let store = Arc::new(MemoryReportStore::new());
    let o = ScanOrchestrator::new(engine.clone(), store.clone());

    assert!(!o.status().running);
    let req = ScanRequest::new("127.0.0.1")
        .ports("1-100")
        .scripts("default")
        .profile(ScanProfile::Basic);
    let accepted = o.start_scan(req).unwrap();
    assert!(o.status().running, "running must be visible once start returns");
    assert_eq!(accepted.arguments, vec!["-sT", "-p", "1-100", "-T4"]);

    let status = wait_idle(&o).await;
    let reports = store.list().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(status.last_report_id, Some(reports[0].id));
    assert_eq!(
        status.message,
        format!("Scan completed. Report: {}", reports[0].name)
    );

    let report = store.get(&reports[0].id).await.unwrap();
    assert!(report.content.contains("127.0.0.1"));
    let line = report
        .content
        .lines()
        .find(|l| l.contains("80") && l.contains("http") && l.trim_start().starts_with("Port"))
        .expect("port line");
    assert!(line.find("80").unwrap() < line.find("http").unwrap());
    assert_eq!(report.arguments, accepted.arguments);

    let calls = engine.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "127.0.0.1");
    assert_eq!(calls[0].1, accepted.arguments);
}

#[tokio::test]
async fn sequential_scans_get_distinct_reports() {
    let store = Arc::new(MemoryReportStore::new());
    let o = ScanOrchestrator::new(Arc::new(StubEngine::default()), store.clone());

    let mut ids = Vec::new();
    for host in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        o.start_scan(ScanRequest::new(host)).unwrap();
        ids.push(wait_idle(&o).await.last_report_id.unwrap());
    }
    let unique: std::collections::HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 3);

    let listed = store.list().await.unwrap();
    assert_eq!(listed[0].host, "10.0.0.3");
    assert_eq!(listed[2].host, "10.0.0.1");

    assert_eq!(store.clear().await.unwrap(), 3);
    assert!(store.get(&ids[0]).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_torn_reports() {
    let store = Arc::new(MemoryReportStore::new());
    let o = ScanOrchestrator::new(Arc::new(StubEngine::default()), store.clone());

    let reader = {
        let store = store.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                for summary in store.list().await.unwrap() {
                    if let Ok(r) = store.get(&summary.id).await {
                        assert_eq!(r.size_bytes, r.content.len() as u64);
                        assert_eq!(r.name, summary.name);
                    }
                }
                tokio::task::yield_now().await;
            }
        })
    };

    for i in 0..5 {
        o.start_scan(ScanRequest::new(format!("192.168.0.{i}"))).unwrap();
        wait_idle(&o).await;
    }
    reader.await.unwrap();
    assert_eq!(store.len().await, 5);
}
