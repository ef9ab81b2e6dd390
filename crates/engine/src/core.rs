//! The dependency-injection root.
//!
//! Built once at process start; every turn borrows from it. There are
//! no global singletons: tests build a `Core` per case with scripted
//! collaborators.

use std::sync::Arc;

use axon_context::{CompressionConfig, ContextCompressor};
use axon_domain::config::ExecutionConfig;
use axon_domain::{Error, Result};
use axon_memory::{
    DocumentStore, Embedder, HashingEmbedder, InMemoryDocumentStore, InMemoryVectorStore,
    LongTermMemoryStore, SimpleMemConfig, SimpleMemIngestor, VectorStore,
};
use axon_providers::LlmClient;
use axon_sandbox::{CleanupReason, SessionManager};
use axon_tools::ToolRegistry;

use crate::cancel::CancelMap;
use crate::checkpoint::{Checkpointer, InMemoryCheckpointer};
use crate::repository::{InMemorySessionRepository, SessionRepository};
use crate::turn::TurnLimits;

pub struct Core {
    pub gateway: Arc<dyn LlmClient>,
    pub memory: Arc<LongTermMemoryStore>,
    pub simplemem: Option<Arc<SimpleMemIngestor>>,
    pub compressor: Arc<ContextCompressor>,
    pub checkpointer: Arc<dyn Checkpointer>,
    pub sandbox: Option<Arc<SessionManager>>,
    pub tools: Arc<ToolRegistry>,
    pub repository: Arc<dyn SessionRepository>,
    pub cancel: CancelMap,
    pub limits: TurnLimits,
}

impl Core {
    pub fn builder(gateway: Arc<dyn LlmClient>) -> CoreBuilder {
        CoreBuilder::new(gateway)
    }

    /// Initialise backing storage and start the sandbox pool sweeper.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.memory.setup().await?;
        if let Some(sandbox) = &self.sandbox {
            sandbox.start();
        }
        Ok(())
    }

    /// Stop background machinery and clean up sandbox sessions.
    pub async fn stop(&self) {
        if let Some(sandbox) = &self.sandbox {
            sandbox.stop(CleanupReason::AppShutdown).await;
        }
    }
}

pub struct CoreBuilder {
    gateway: Arc<dyn LlmClient>,
    embedder: Option<Arc<dyn Embedder>>,
    vector: Option<Arc<dyn VectorStore>>,
    docs: Option<Arc<dyn DocumentStore>>,
    embedding_dimension: usize,
    simplemem_enabled: bool,
    simplemem_config: SimpleMemConfig,
    compression: CompressionConfig,
    summarizer_enabled: bool,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    sandbox: Option<Arc<SessionManager>>,
    tools: Option<Arc<ToolRegistry>>,
    repository: Option<Arc<dyn SessionRepository>>,
    execution: ExecutionConfig,
    limits: TurnLimits,
}

impl CoreBuilder {
    pub fn new(gateway: Arc<dyn LlmClient>) -> Self {
        Self {
            gateway,
            embedder: None,
            vector: None,
            docs: None,
            embedding_dimension: 256,
            simplemem_enabled: true,
            simplemem_config: SimpleMemConfig::default(),
            compression: CompressionConfig::default(),
            summarizer_enabled: true,
            checkpointer: None,
            sandbox: None,
            tools: None,
            repository: None,
            execution: ExecutionConfig::default(),
            limits: TurnLimits::default(),
        }
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedding_dimension = embedder.dimension();
        self.embedder = Some(embedder);
        self
    }

    pub fn vector_store(mut self, vector: Arc<dyn VectorStore>, dimension: usize) -> Self {
        self.vector = Some(vector);
        self.embedding_dimension = dimension;
        self
    }

    pub fn document_store(mut self, docs: Arc<dyn DocumentStore>) -> Self {
        self.docs = Some(docs);
        self
    }

    pub fn simplemem(mut self, enabled: bool, config: SimpleMemConfig) -> Self {
        self.simplemem_enabled = enabled;
        self.simplemem_config = config;
        self
    }

    pub fn compression(mut self, config: CompressionConfig) -> Self {
        self.compression = config;
        self
    }

    /// Disable LLM-backed summarisation (compression stays
    /// deterministic).
    pub fn without_summarizer(mut self) -> Self {
        self.summarizer_enabled = false;
        self
    }

    pub fn checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn sandbox(mut self, sandbox: Arc<SessionManager>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn repository(mut self, repository: Arc<dyn SessionRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn execution_config(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    pub fn limits(mut self, limits: TurnLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn build(self) -> Result<Arc<Core>> {
        if self.limits.max_tool_iterations > 1000 {
            return Err(Error::Config("max_tool_iterations is implausibly large".into()));
        }

        let embedder = self
            .embedder
            .unwrap_or_else(|| Arc::new(HashingEmbedder::new(self.embedding_dimension)));
        let vector = self
            .vector
            .unwrap_or_else(|| Arc::new(InMemoryVectorStore::new(Arc::clone(&embedder))));
        let docs = self
            .docs
            .unwrap_or_else(|| Arc::new(InMemoryDocumentStore::new()));

        let memory = Arc::new(LongTermMemoryStore::new(
            vector,
            docs,
            self.embedding_dimension,
        ));

        let simplemem = self.simplemem_enabled.then(|| {
            Arc::new(SimpleMemIngestor::new(
                Arc::clone(&self.gateway),
                Arc::clone(&memory),
                self.simplemem_config,
            ))
        });

        let summarizer = self
            .summarizer_enabled
            .then(|| Arc::clone(&self.gateway));
        let compressor = Arc::new(ContextCompressor::new(self.compression, summarizer));

        Ok(Arc::new(Core {
            gateway: self.gateway,
            memory,
            simplemem,
            compressor,
            checkpointer: self
                .checkpointer
                .unwrap_or_else(|| Arc::new(InMemoryCheckpointer::new())),
            sandbox: self.sandbox,
            tools: self
                .tools
                .unwrap_or_else(|| Arc::new(ToolRegistry::new(self.execution.tools.clone()))),
            repository: self
                .repository
                .unwrap_or_else(|| Arc::new(InMemorySessionRepository::new())),
            cancel: CancelMap::new(),
            limits: self.limits,
        }))
    }
}
