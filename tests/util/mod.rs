use std::sync::{Arc, Mutex};
use std::time::Duration;

use ragtune::config::{GenerationConfig, RagtuneConfig};
use ragtune::error::Result;
use ragtune::pipeline::generator::Generator;
use ragtune::pipeline::orchestrator::Orchestrator;
use ragtune::search::corpus::synthetic_corpus;
use ragtune::search::embedder::Embedder;
use ragtune::search::hash_embedder::HashEmbedder;
use ragtune::search::quantized_store::QuantizedStore;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }

    /// Captured lines containing `needle`.
    pub fn lines_with(&self, needle: &str) -> Vec<String> {
        self.output()
            .lines()
            .filter(|l| l.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

struct TestWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Default configuration with a generator that returns immediately.
#[allow(dead_code)]
pub fn instant_config() -> RagtuneConfig {
    RagtuneConfig {
        generation: GenerationConfig {
            full_base_ms: 0.0,
            cheap_base_ms: 0.0,
            per_token_ms: 0.0,
        },
        ..RagtuneConfig::default()
    }
}

#[allow(dead_code)]
pub fn build_store(rows: usize, dim: usize, cfg: &RagtuneConfig) -> Arc<QuantizedStore> {
    let corpus = synthetic_corpus(rows, dim, 7).expect("synthetic corpus");
    Arc::new(QuantizedStore::build(corpus, &cfg.store).expect("store builds"))
}

#[allow(dead_code)]
pub fn orchestrator(rows: usize, dim: usize, cfg: &RagtuneConfig) -> Orchestrator {
    Orchestrator::from_config(build_store(rows, dim, cfg), cfg).expect("orchestrator")
}

/// Generator that sleeps for a fixed time regardless of knobs.
#[allow(dead_code)]
pub struct FixedLatencyGenerator(pub Duration);

impl Generator for FixedLatencyGenerator {
    fn generate(&self, question: &str, docs: &[usize], _cheap: bool) -> Result<String> {
        std::thread::sleep(self.0);
        Ok(format!("Answer: {question} (docs={})", docs.len()))
    }
}

/// Hash embedder with an artificial per-call delay.
#[allow(dead_code)]
pub struct DelayedEmbedder {
    inner: HashEmbedder,
    delay: Duration,
}

#[allow(dead_code)]
impl DelayedEmbedder {
    pub fn new(dimension: usize, delay: Duration) -> Self {
        Self {
            inner: HashEmbedder::new(dimension),
            delay,
        }
    }
}

impl Embedder for DelayedEmbedder {
    fn id(&self) -> &str {
        "delayed"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        std::thread::sleep(self.delay);
        self.inner.embed(text)
    }
}
