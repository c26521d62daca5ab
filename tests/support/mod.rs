#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use bytes::Bytes;
use docprint::{
    application::print::{
        DocumentRenderer, PrintPipeline, RenderEngine, RenderTarget, RenderedDocument,
        RendererError,
    },
    cache::{CacheStore, Clock, DiskCacheStore},
    domain::document::{DEFAULT_FALLBACK_DOCUMENT_ID, DocumentId},
};
use lopdf::{Document, Object, Stream, dictionary};
use tempfile::TempDir;
use url::Url;

pub const BASE_URL: &str = "https://docs.example.com/";
pub const TTL: Duration = Duration::from_secs(15 * 60);

/// Letter-sized PDF with `pages` pages of text.
pub fn pdf_with_pages(pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(pages);
    for number in 1..=pages {
        let content = Stream::new(
            dictionary! {},
            format!("BT /F1 12 Tf 72 720 Td (Page {number}) Tj ET").into_bytes(),
        );
        let content_id = doc.add_object(content);
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("serialize fixture");
    bytes
}

pub fn page_count(pdf: &[u8]) -> usize {
    Document::load_mem(pdf).expect("decode output").get_pages().len()
}

pub fn embedded_title(pdf: &[u8]) -> Option<String> {
    let doc = Document::load_mem(pdf).expect("decode output");
    let info = doc.trailer.get(b"Info").ok()?;
    let info = match info {
        Object::Reference(id) => doc.get_dictionary(*id).ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    let title = info.get(b"Title").ok()?;
    match title {
        Object::String(bytes, _) => {
            if bytes.starts_with(&[0xFE, 0xFF]) {
                let units: Vec<u16> = bytes[2..]
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&units).ok()
            } else {
                Some(String::from_utf8_lossy(bytes).into_owned())
            }
        }
        _ => None,
    }
}

/// In-process renderer that records every capture it is asked for.
pub struct FakeRenderer {
    pages: usize,
    title: Option<String>,
    delay: Duration,
    failure: Mutex<Option<RendererError>>,
    calls: AtomicUsize,
    targets: Mutex<Vec<RenderTarget>>,
}

impl FakeRenderer {
    pub fn new(pages: usize, title: Option<&str>) -> Self {
        Self {
            pages,
            title: title.map(str::to_string),
            delay: Duration::ZERO,
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(self, error: RendererError) -> Self {
        *self.failure.lock().expect("failure lock") = Some(error);
        self
    }

    pub fn recover(&self) {
        *self.failure.lock().expect("failure lock") = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn targets(&self) -> Vec<RenderTarget> {
        self.targets.lock().expect("targets lock").clone()
    }
}

#[async_trait]
impl DocumentRenderer for FakeRenderer {
    async fn render(&self, target: &RenderTarget) -> Result<RenderedDocument, RendererError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.targets
            .lock()
            .expect("targets lock")
            .push(target.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = self.failure.lock().expect("failure lock").clone() {
            return Err(error);
        }
        Ok(RenderedDocument {
            pdf: Bytes::from(pdf_with_pages(self.pages)),
            title: self.title.clone(),
        })
    }
}

/// Clock that starts at construction and only moves when advanced.
pub struct SteppedClock {
    origin: SystemTime,
    offset_ms: AtomicU64,
}

impl SteppedClock {
    pub fn new() -> Self {
        Self {
            origin: SystemTime::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for SteppedClock {
    fn now(&self) -> SystemTime {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// Disk store rooted below a regular file, so every write fails.
pub fn unwritable_store(dir: &std::path::Path) -> Arc<DiskCacheStore> {
    let blocker = dir.join("not-a-dir");
    std::fs::write(&blocker, b"file").expect("write blocker");
    Arc::new(DiskCacheStore::new(
        blocker.join("print"),
        TTL,
        Arc::new(SteppedClock::new()),
    ))
}

pub fn pipeline_over(store: Arc<dyn CacheStore>, renderer: Arc<FakeRenderer>) -> PrintPipeline {
    let engine = RenderEngine::new(renderer, Url::parse(BASE_URL).expect("base url"));
    let fallback = DocumentId::parse(DEFAULT_FALLBACK_DOCUMENT_ID).expect("fallback id");
    PrintPipeline::new(store, engine, fallback)
}

/// Pipeline over a scratch cache directory and a stepped clock.
pub struct Harness {
    pub pipeline: Arc<PrintPipeline>,
    pub renderer: Arc<FakeRenderer>,
    pub clock: Arc<SteppedClock>,
    pub store: Arc<DiskCacheStore>,
    pub cache_dir: TempDir,
}

impl Harness {
    pub fn new(renderer: FakeRenderer) -> Self {
        let cache_dir = TempDir::new().expect("cache dir");
        let clock = Arc::new(SteppedClock::new());
        let store = Arc::new(DiskCacheStore::new(
            cache_dir.path().join("print"),
            TTL,
            clock.clone(),
        ));
        let renderer = Arc::new(renderer);
        let pipeline = Arc::new(pipeline_over(store.clone(), renderer.clone()));
        Self {
            pipeline,
            renderer,
            clock,
            store,
            cache_dir,
        }
    }

    pub fn cached_files(&self) -> Vec<String> {
        list_files(self.store.root())
    }
}

pub fn list_files(dir: &std::path::Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
