#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use pixel_ingest::{
    coordinator::{BatchResult, IngestionCoordinator},
    error::{FetchError, SinkError, StoreError},
    fetch::ContentFetcher,
    item::{ItemRef, StorageKey},
    pipeline::ItemPipeline,
    status::{RetryPolicy, StatusReporter, StatusSink},
    store::ObjectStore,
    transform::ImageCodec,
};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_fn(64, 48, |x, y| Rgb([x as u8, y as u8, 200]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[derive(Clone, Copy)]
pub enum Serve {
    Image,
    Garbage,
    Fail,
    Hang,
    Panic,
}

/// Tracks how many calls are inside a collaborator at once.
#[derive(Default)]
pub struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Serves responses by reference basename; unknown names get an image.
pub struct ScriptedFetcher {
    script: HashMap<String, Serve>,
    delay: Duration,
    pub gauge: Arc<Gauge>,
    pub calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(script: &[(&str, Serve)]) -> Self {
        Self {
            script: script
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            delay: Duration::ZERO,
            gauge: Arc::new(Gauge::default()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<Gauge>) -> Self {
        self.gauge = gauge;
        self
    }
}

#[async_trait]
impl ContentFetcher for ScriptedFetcher {
    async fn fetch(&self, reference: &ItemRef) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gauge.enter();
        tokio::time::sleep(self.delay).await;
        let serve = reference
            .basename()
            .and_then(|b| self.script.get(b).copied())
            .unwrap_or(Serve::Image);
        let res = match serve {
            Serve::Image => Ok(png_bytes()),
            Serve::Garbage => Ok(b"not an image".to_vec()),
            Serve::Fail => Err(FetchError::Status {
                url: reference.to_string(),
                status: 404,
            }),
            Serve::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
            Serve::Panic => panic!("fetcher blew up on {reference}"),
        };
        self.gauge.leave();
        res
    }
}

/// Records puts; names listed in `fail` are rejected.
#[derive(Default)]
pub struct MemoryStore {
    pub puts: Mutex<Vec<(String, Vec<u8>)>>,
    fail: Vec<String>,
    delay: Duration,
    pub gauge: Arc<Gauge>,
}

impl MemoryStore {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            fail: names.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<Gauge>) -> Self {
        self.gauge = gauge;
        self
    }

    pub fn keys(&self) -> Vec<String> {
        self.puts.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &StorageKey, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.gauge.enter();
        tokio::time::sleep(self.delay).await;
        let res = if self.fail.contains(&key.name) {
            Err(StoreError::Status {
                key: key.to_string(),
                status: 503,
            })
        } else {
            self.puts
                .lock()
                .unwrap()
                .push((key.as_object_key(), bytes));
            Ok(())
        };
        self.gauge.leave();
        res
    }
}

#[derive(Clone, Default)]
pub struct MemorySink {
    pub lines: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl StatusSink for MemorySink {
    async fn send(&mut self, line: &str) -> Result<(), SinkError> {
        self.lines.lock().unwrap().push(line.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub coordinator: IngestionCoordinator,
    pub reporter_task: pixel_ingest::status::ReporterTask,
    pub lines: Arc<Mutex<Vec<String>>>,
}

pub fn harness(
    fetcher: Arc<dyn ContentFetcher>,
    store: Arc<dyn ObjectStore>,
    max_concurrency: usize,
) -> Harness {
    let sink = MemorySink::default();
    let lines = sink.lines.clone();
    let retry = RetryPolicy {
        max_retries: 0,
        delay: Duration::ZERO,
    };
    let (reporter, reporter_task) = StatusReporter::spawn(sink, 64, retry);
    let pipeline = ItemPipeline::new(fetcher, Arc::new(ImageCodec), store, reporter);
    Harness {
        coordinator: IngestionCoordinator::new(pipeline).with_max_concurrency(max_concurrency),
        reporter_task,
        lines,
    }
}

impl Harness {
    /// Runs the batch, shuts the reporter down, and returns the wire lines.
    pub async fn run(self, label: &str, refs: &[&str]) -> (BatchResult, Vec<String>) {
        let refs = refs.iter().map(|r| ItemRef::new(*r)).collect();
        let result = self.coordinator.run(label, refs).await.unwrap();
        drop(self.coordinator);
        self.reporter_task.join().await;
        let lines = self.lines.lock().unwrap().clone();
        (result, lines)
    }
}
