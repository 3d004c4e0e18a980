use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(host: &str, port: u16) -> Self {
        let stream = TcpStream::connect((host, port))
            .await
            .expect("connect failed");
        Self {
            framed: Framed::new(stream, LinesCodec::new()),
        }
    }

    async fn request(&mut self, req: Value) -> Value {
        self.framed.send(req.to_string()).await.expect("send failed");
        let line = self
            .framed
            .next()
            .await
            .expect("connection closed")
            .expect("read failed");
        serde_json::from_str(&line).expect("invalid response")
    }

    async fn create(&mut self, req: Value) -> String {
        let resp = self.request(req).await;
        assert_eq!(resp["ok"], true, "{resp}");
        resp["data"]["id"].as_str().unwrap().to_string()
    }

    async fn resource(&mut self, name: &str) -> String {
        self.create(json!({ "op": "create_resource", "name": name, "resource_type": "bench" }))
            .await
    }

    async fn event(&mut self, slot: i64) -> String {
        let start = slot_start(slot);
        let end = start + TimeDelta::hours(1);
        self.create(json!({ "op": "create_event", "title": format!("slot {slot}"), "start": start, "end": end }))
            .await
    }

    async fn allocate(&mut self, event_id: &str, resource_id: &str) -> Value {
        self.request(json!({ "op": "allocate", "event_id": event_id, "resource_id": resource_id }))
            .await
    }
}

fn slot_start(slot: i64) -> NaiveDateTime {
    let base = NaiveDate::from_ymd_opt(2030, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    base + TimeDelta::hours(slot)
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn phase1_sequential(host: &str, port: u16) {
    let mut client = Client::connect(host, port).await;
    let rid = client.resource("sequential").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as i64 {
        let eid = client.event(i).await;
        let t = Instant::now();
        let resp = client.allocate(&eid, &rid).await;
        latencies.push(t.elapsed());
        assert_eq!(resp["ok"], true, "{resp}");
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} allocations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("allocate latency", &mut latencies);
}

async fn phase2_contended(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;

    let mut setup = Client::connect(host, port).await;
    let rid = setup.resource("contended").await;
    drop(setup);

    let granted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let rid = rid.clone();
        let granted = granted.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            // every task competes for the same slots
            for j in 0..n_per_task {
                let eid = client.event(j).await;
                let resp = client.allocate(&eid, &rid).await;
                if resp["ok"] == true {
                    granted.fetch_add(1, Ordering::Relaxed);
                } else {
                    assert_eq!(resp["error"]["code"], "scheduling_conflict", "{resp}");
                    rejected.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    let granted = granted.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_per_task} allocations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    println!(
        "  granted={granted} (expected {n_per_task}), rejected={}",
        rejected.load(Ordering::Relaxed)
    );
    assert_eq!(granted, n_per_task as usize, "double booking under contention");
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let mut setup = Client::connect(host, port).await;
    let rid = setup.resource("read-target").await;
    for i in 0..200 {
        let eid = setup.event(i * 2).await;
        setup.allocate(&eid, &rid).await;
    }
    drop(setup);

    // Writers: continuously allocate on their own resources
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5i64 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            let wrid = client.resource(&format!("writer-{w}")).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let eid = client.event(w * 100_000 + i).await;
                let _ = client.allocate(&eid, &wrid).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let host = host.to_string();
        let rid = rid.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for k in 0..reads_per_reader as i64 {
                let start = slot_start((r + k) % 400);
                let end = start + TimeDelta::minutes(30);
                let t = Instant::now();
                let resp = client
                    .request(json!({ "op": "find_conflict", "resource_id": rid, "start": start, "end": end }))
                    .await;
                latencies.push(t.elapsed());
                assert_eq!(resp["ok"], true, "{resp}");
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("find_conflict query", &mut all_latencies);

    let mut client = Client::connect(host, port).await;
    let t = Instant::now();
    let resp = client
        .request(json!({ "op": "utilization", "start_date": "2030-01-01", "end_date": "2030-12-31" }))
        .await;
    assert_eq!(resp["ok"], true, "{resp}");
    println!(
        "  utilization report over {} resources: {:.2}ms",
        resp["data"].as_array().map_or(0, |rows| rows.len()),
        t.elapsed().as_secs_f64() * 1000.0
    );
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            let rid = client.resource(&format!("storm-{c}")).await;
            for i in 0..ops_per_conn {
                let eid = client.event(i).await;
                let resp = client.allocate(&eid, &rid).await;
                assert_eq!(resp["ok"], true, "{resp}");
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ALLOCD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ALLOCD_PORT")
        .unwrap_or_else(|_| "7070".into())
        .parse()
        .expect("invalid ALLOCD_PORT");

    println!("=== allocd stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential allocation throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended allocation on one resource");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== done ===");
}
