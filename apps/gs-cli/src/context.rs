// context.rs — Wiring of configuration into collaborators.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use gs_policy::{ChangeSet, Verdict};
use gs_rules::{
    CommandTranslator, EvaluatorGateway, OpaEvaluator, TemplateTranslator, TranslationGateway,
    Translator,
};
use gs_sync::{
    EventDispatcher, FileRuleStore, LogSink, Orchestrator, RunSettings, StatePaths, SyncConfig,
    SyncStore, TracingSink, TranslatorKind,
};
use gs_validate::{
    CaseGenerator, DifferentialValidator, FixtureCorpus, ReferenceEvaluator, ValidationSuite,
};

pub struct Context {
    pub paths: StatePaths,
    pub config: SyncConfig,
}

impl Context {
    pub fn load(project_root: &Path, config_file: Option<&Path>) -> anyhow::Result<Self> {
        let paths = StatePaths::for_project(project_root);
        let config = match config_file {
            Some(path) => SyncConfig::load(path)?,
            None => SyncConfig::load_or_default(&paths.config_file)?,
        };
        Ok(Self { paths, config })
    }

    /// Resolve a user-supplied path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.paths.project_root.join(path)
    }

    pub fn store(&self) -> anyhow::Result<SyncStore> {
        Ok(SyncStore::open(&self.paths.state_dir)?)
    }

    pub fn rule_store(&self) -> anyhow::Result<FileRuleStore> {
        Ok(FileRuleStore::open(&self.paths.rules_dir, &self.paths.ledger)?)
    }

    pub fn reference(&self) -> ReferenceEvaluator {
        ReferenceEvaluator::new(self.config.validation.implicit_verdict)
    }

    pub fn translator(&self) -> anyhow::Result<Arc<dyn Translator>> {
        let config = &self.config.translator;
        let translator: Arc<dyn Translator> = match config.kind {
            TranslatorKind::Template => Arc::new(
                TemplateTranslator::new(&config.package)
                    .with_implicit_deny(self.config.validation.implicit_verdict == Verdict::Deny),
            ),
            TranslatorKind::Command => {
                let (program, args) = config
                    .command
                    .split_first()
                    .context("translator.kind = \"command\" needs translator.command")?;
                Arc::new(CommandTranslator::new(
                    program,
                    args.to_vec(),
                    self.config.gateway.call_timeout(),
                ))
            }
        };
        Ok(translator)
    }

    pub fn translation(&self) -> anyhow::Result<TranslationGateway> {
        Ok(TranslationGateway::new(
            self.translator()?,
            self.config.gateway.call_timeout(),
        ))
    }

    pub fn validator(&self) -> anyhow::Result<DifferentialValidator> {
        let timeout = self.config.gateway.call_timeout();
        let opa = OpaEvaluator::locate(&self.config.evaluator.opa_path, timeout)?;
        tracing::debug!(binary = %opa.binary().display(), "using opa evaluator");
        let gateway = EvaluatorGateway::new(Arc::new(opa), timeout);
        Ok(DifferentialValidator::new(Arc::new(gateway)))
    }

    /// Fidelity cases, fixtures and the candidate change set named in config.
    pub fn suite(&self, fixtures_override: Option<&Path>, fidelity: bool) -> anyhow::Result<ValidationSuite> {
        let validation = &self.config.validation;
        let mut suite = ValidationSuite::new();
        if fidelity {
            suite = suite.with_fidelity(CaseGenerator::new(self.reference()));
        }
        let fixtures_dir = fixtures_override
            .map(Path::to_path_buf)
            .or_else(|| validation.fixtures_dir.clone());
        if let Some(dir) = fixtures_dir {
            let corpus = FixtureCorpus::load(&self.resolve(&dir))?;
            tracing::info!(fixtures = corpus.len(), root = %corpus.root().display(), "loaded fixture corpus");
            suite = suite.with_fixtures(corpus.into_change_set());
        }
        if let Some(path) = &validation.change_set {
            suite = suite.with_candidate(ChangeSet::load(&self.resolve(path))?);
        }
        Ok(suite)
    }

    pub fn orchestrator(&self) -> anyhow::Result<Orchestrator> {
        let settings = RunSettings::from_config(&self.config)?;
        let sink = Arc::new(self.rule_store()?);
        let notifier = EventDispatcher::new()
            .with_sink(Box::new(LogSink::new(&self.paths.notifications_log)))
            .with_sink(Box::new(TracingSink));
        let orchestrator = Orchestrator::new(
            self.store()?,
            self.translation()?,
            self.validator()?,
            sink,
            notifier,
            settings,
        )
        .with_suite(self.suite(None, self.config.validation.fidelity)?);
        Ok(orchestrator)
    }
}
