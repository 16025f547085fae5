//! The iteration engine: hypothesis generation, bounded-parallel research,
//! checkpoint synthesis, evaluation, refinement, adaptive stopping, and
//! finalization into a graded report. One analysis runs as one logical task;
//! the only concurrency is among deep-research calls for different
//! hypotheses, bounded by a semaphore.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use agent_client::{
    BreakerTable, EvaluatorAgent, HypothesisAgent, LlmProvider, NarrativeAgent, ResearchAgent,
    SynthesisAgent, WorkerOutput,
};
use memory_retrieval::{to_enriched_context, MemoryRetriever, MemorySource};
use report_validation::{FullValidator, Severity, ValidationOutcome};
use research_core::agents::{
    EnrichedContext, EvaluationCriteria, EvaluationRequest, EvaluationType, HypothesisRequest,
    NarrativeRequest, ResearchFindings, ResearchRequest, SynthesisRequest,
};
use research_core::config::EngineConfig;
use research_core::error::ResearchError;
use research_core::report::FinalReport;
use research_core::trace::{TraceEvent, TraceKind};
use research_core::types::{
    assign_impact_ranks, AnalysisState, AnalysisStatus, EvidenceBundle, EvidenceItem, Hypothesis,
    IterationDetail, IterationRecord, SynthesisRecord,
};
use state_store::{StateStore, TraceWriter};
use valuation_engine::calculate_dcf;

use crate::allocator::EvidenceIdAllocator;
use crate::assemble::assemble_valuation_inputs;
use crate::data::{CompanySnapshot, MarketDataProvider};
use crate::governor::{CostGovernor, GovernorDecision};
use crate::policy::{
    aggregate_confidence, check_stop, evidence_confidence, should_synthesize, StopReason,
};
use crate::worker::call_worker;

const ITERATION_RUBRIC: [&str; 3] = ["hypothesis_quality", "evidence_depth", "synthesis_rigor"];
const ITERATION_THRESHOLD: f64 = 0.70;
const MEMORY_RESULTS_PER_SOURCE: usize = 5;

/// Terminal product of one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub analysis_id: String,
    pub report: FinalReport,
    pub validation: ValidationOutcome,
    pub stop_reason: StopReason,
    pub iterations: u32,
    pub total_cost_usd: f64,
}

struct AnalysisContext {
    state: AnalysisState,
    bundle: EvidenceBundle,
    /// Latest synthesis per hypothesis, for prior-synthesis context and the
    /// final narrative.
    latest_syntheses: BTreeMap<String, SynthesisRecord>,
    synthesis_count: usize,
    snapshot: CompanySnapshot,
    trace: Arc<TraceWriter>,
    allocator: EvidenceIdAllocator,
    breakers: Arc<BreakerTable>,
    governor: CostGovernor,
    cancel: watch::Receiver<bool>,
    started: Instant,
}

impl AnalysisContext {
    /// Cancellation is observed at suspension points; in-flight work is
    /// allowed to finish but its output is discarded by the early return.
    fn check_cancel(&self) -> Result<(), ResearchError> {
        if *self.cancel.borrow() {
            Err(ResearchError::Fatal("analysis cancelled".to_string()))
        } else {
            Ok(())
        }
    }
}

pub struct Orchestrator {
    config: EngineConfig,
    store: Arc<StateStore>,
    data: Arc<dyn MarketDataProvider>,
    memory: Option<Arc<dyn MemoryRetriever>>,
    hypothesis: Arc<HypothesisAgent>,
    research: Arc<ResearchAgent>,
    synthesis: Arc<SynthesisAgent>,
    narrative: Arc<NarrativeAgent>,
    evaluator: Arc<EvaluatorAgent>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        store: Arc<StateStore>,
        provider: Arc<dyn LlmProvider>,
        data: Arc<dyn MarketDataProvider>,
    ) -> Self {
        Self {
            config,
            store,
            data,
            memory: None,
            hypothesis: Arc::new(HypothesisAgent::new(provider.clone())),
            research: Arc::new(ResearchAgent::new(provider.clone())),
            synthesis: Arc::new(SynthesisAgent::new(provider.clone())),
            narrative: Arc::new(NarrativeAgent::new(provider.clone())),
            evaluator: Arc::new(EvaluatorAgent::new(provider)),
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryRetriever>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub async fn run(&self, ticker: &str) -> Result<AnalysisOutcome, ResearchError> {
        let (_tx, rx) = watch::channel(false);
        self.run_with_cancel(ticker, rx).await
    }

    /// Start a fresh analysis for `ticker`.
    pub async fn run_with_cancel(
        &self,
        ticker: &str,
        cancel: watch::Receiver<bool>,
    ) -> Result<AnalysisOutcome, ResearchError> {
        let snapshot = self.data.company_snapshot(ticker).await?;
        let analysis_id = Uuid::new_v4().to_string();
        self.store
            .init_analysis(&analysis_id)
            .map_err(|e| ResearchError::State(e.to_string()))?;
        let trace = TraceWriter::new(self.store.logs_dir(&analysis_id))
            .map_err(|e| ResearchError::State(e.to_string()))?;

        tracing::info!(
            "starting analysis {analysis_id} for {ticker} ({})",
            snapshot.name
        );

        let state = AnalysisState::new(
            analysis_id,
            ticker.to_string(),
            snapshot.name.clone(),
            self.config.clone(),
        );
        let governor = CostGovernor::new(state.config.budget_usd);
        let mut ctx = AnalysisContext {
            state,
            bundle: EvidenceBundle::new(),
            latest_syntheses: BTreeMap::new(),
            synthesis_count: 0,
            snapshot,
            trace: Arc::new(trace),
            allocator: EvidenceIdAllocator::new(),
            breakers: Arc::new(BreakerTable::default()),
            governor,
            cancel,
            started: Instant::now(),
        };
        self.drive(&mut ctx).await
    }

    pub async fn resume(&self, analysis_id: &str) -> Result<AnalysisOutcome, ResearchError> {
        let (_tx, rx) = watch::channel(false);
        self.resume_with_cancel(analysis_id, rx).await
    }

    /// Resume from persisted state: the highest-indexed iteration on disk
    /// defines the next iteration to run. Raw iteration files are never
    /// rewritten.
    pub async fn resume_with_cancel(
        &self,
        analysis_id: &str,
        cancel: watch::Receiver<bool>,
    ) -> Result<AnalysisOutcome, ResearchError> {
        let mut state = self
            .store
            .load_analysis_state(analysis_id)
            .map_err(|e| ResearchError::State(e.to_string()))?
            .ok_or_else(|| {
                ResearchError::State(format!("no persisted state for {analysis_id}"))
            })?;
        let bundle = self
            .store
            .load_evidence_bundle(analysis_id)
            .map_err(|e| ResearchError::State(e.to_string()))?
            .unwrap_or_default();
        let highest = self
            .store
            .highest_iteration(analysis_id)
            .map_err(|e| ResearchError::State(e.to_string()))?;

        // Latest synthesis per hypothesis, replayed from the raw files.
        let mut latest_syntheses = BTreeMap::new();
        let mut synthesis_count = 0;
        for n in 1..=highest {
            if let Some(detail) = self
                .store
                .load_iteration(analysis_id, n)
                .map_err(|e| ResearchError::State(e.to_string()))?
            {
                for record in detail.syntheses {
                    synthesis_count += 1;
                    latest_syntheses.insert(record.hypothesis_id.clone(), record);
                }
            }
        }

        let snapshot = self.data.company_snapshot(&state.ticker).await?;
        let trace = TraceWriter::resume(self.store.logs_dir(analysis_id))
            .map_err(|e| ResearchError::State(e.to_string()))?;

        tracing::info!(
            "resuming analysis {analysis_id} for {} from iteration {highest}",
            state.ticker
        );
        state.status = AnalysisStatus::Running;
        state.current_iteration = highest;

        let governor = CostGovernor::new(state.config.budget_usd);
        let allocator = EvidenceIdAllocator::resuming(&bundle);
        let mut ctx = AnalysisContext {
            state,
            bundle,
            latest_syntheses,
            synthesis_count,
            snapshot,
            trace: Arc::new(trace),
            allocator,
            breakers: Arc::new(BreakerTable::default()),
            governor,
            cancel,
            started: Instant::now(),
        };
        self.drive(&mut ctx).await
    }

    /// Run iterations until a stop criterion fires, then finalize. Any error
    /// marks the analysis failed and preserves partial state on disk.
    async fn drive(&self, ctx: &mut AnalysisContext) -> Result<AnalysisOutcome, ResearchError> {
        let result = self.run_loop(ctx).await;
        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                ctx.state.status = AnalysisStatus::Failed;
                if let Err(persist_err) = self.store.save_analysis_state(&ctx.state) {
                    tracing::error!("failed to persist failed state: {persist_err}");
                }
                let _ = ctx.trace.append(&TraceEvent::new(
                    &ctx.state.analysis_id,
                    TraceKind::Error,
                    json!({"fatal": err.to_string()}),
                ));
                Err(err)
            }
        }
    }

    async fn run_loop(&self, ctx: &mut AnalysisContext) -> Result<AnalysisOutcome, ResearchError> {
        let stop = loop {
            let n = ctx.state.current_iteration + 1;
            if n > ctx.state.config.max_iterations {
                break StopReason::MaxIterations;
            }
            if let Some(bound) = ctx.state.config.wall_clock_secs {
                if ctx.started.elapsed() >= Duration::from_secs(bound) {
                    tracing::warn!("soft wall-clock bound exceeded, finalizing early");
                    break StopReason::WallClockExceeded;
                }
            }
            if let Some(reason) = self.iterate(ctx, n).await? {
                break reason;
            }
        };
        self.finalize(ctx, stop).await
    }

    /// One full iteration. Ordering within the iteration is the contract:
    /// hypotheses before research, research before synthesis, synthesis
    /// before evaluation, everything persisted before the next iteration.
    async fn iterate(
        &self,
        ctx: &mut AnalysisContext,
        n: u32,
    ) -> Result<Option<StopReason>, ResearchError> {
        ctx.check_cancel()?;
        let iteration_started = Instant::now();
        let cost_before = ctx.trace.total_cost();
        self.trace(
            ctx,
            TraceKind::Planning,
            json!({
                "iteration": n,
                "hypotheses": ctx.state.hypotheses.len(),
                "research_gaps": ctx.state.research_gaps.len(),
            }),
        )?;

        // 1. Hypothesis step: every iteration, empty gaps permitted.
        let generated = self.hypothesis_step(ctx, n).await?;

        // 2. Research step: all HIGH, plus MEDIUM below the refinement bar.
        ctx.check_cancel()?;
        let new_evidence = self.research_step(ctx).await?;

        // 3. Checkpoint synthesis, ascending impact rank, strictly serial.
        ctx.check_cancel()?;
        let iteration_syntheses = if ctx.state.config.is_checkpoint(n) {
            self.synthesis_step(ctx, n).await?
        } else {
            Vec::new()
        };

        // 4. Evaluation.
        ctx.check_cancel()?;
        let quality_score = self.evaluation_step(ctx, n).await;

        // 5. Refinement: stalled hypotheses and unresolved contradictions.
        let mut gaps = Vec::new();
        for h in &ctx.state.hypotheses {
            if let [.., previous, latest] = h.confidence_trajectory.as_slice() {
                if latest - previous < ctx.state.config.min_confidence_delta {
                    gaps.push(format!("confidence stalled on '{}'", h.title));
                }
            }
        }
        for (a, b) in ctx.bundle.unresolved_contradictions() {
            gaps.push(format!("unresolved contradiction between {a} and {b}"));
        }
        ctx.state.research_gaps = gaps;

        ctx.state.overall_confidence =
            aggregate_confidence(&ctx.state.hypotheses, &ctx.bundle);
        ctx.state.quality_scores.push(quality_score);

        // 6-8. Record, compress across layer boundaries, persist atomically.
        ctx.check_cancel()?;
        let validated: Vec<Hypothesis> = ctx
            .state
            .hypotheses
            .iter()
            .filter(|h| h.confidence >= ctx.state.config.refinement_threshold)
            .cloned()
            .collect();
        let detail = IterationDetail {
            record: IterationRecord {
                iteration: n,
                duration_s: iteration_started.elapsed().as_secs_f64(),
                hypotheses_generated: generated,
                hypotheses_validated: validated.len(),
                confidence: ctx.state.overall_confidence,
                quality_score,
                cost_usd: ctx.trace.total_cost() - cost_before,
                evidence_ids: new_evidence.iter().map(|e| e.id.clone()).collect(),
                synthesized_hypotheses: iteration_syntheses
                    .iter()
                    .map(|s| s.hypothesis_id.clone())
                    .collect(),
            },
            hypotheses: ctx.state.hypotheses.clone(),
            evidence: new_evidence,
            syntheses: iteration_syntheses,
        };
        self.store
            .save_iteration(&ctx.state.analysis_id, &detail)
            .map_err(|e| ResearchError::State(e.to_string()))?;
        ctx.state.history.push(detail);
        ctx.state.current_iteration = n;
        ctx.state.cumulative_cost_usd = ctx.trace.total_cost();

        // Budget governor reviews spend-to-completion at every iteration end.
        let decision =
            ctx.governor
                .review(ctx.trace.total_cost(), n, &mut ctx.state.config);
        match &decision {
            GovernorDecision::Degraded { level, action } => {
                self.trace(
                    ctx,
                    TraceKind::Planning,
                    json!({"governor": action, "level": level}),
                )?;
            }
            GovernorDecision::Exhausted => {
                self.trace(ctx, TraceKind::Planning, json!({"governor": "exhausted"}))?;
            }
            GovernorDecision::Continue => {}
        }

        self.persist(ctx, &validated)?;

        if decision == GovernorDecision::Exhausted {
            return Ok(Some(StopReason::BudgetExhausted));
        }
        Ok(check_stop(&ctx.state, ctx.synthesis_count))
    }

    async fn hypothesis_step(
        &self,
        ctx: &mut AnalysisContext,
        n: u32,
    ) -> Result<usize, ResearchError> {
        let enriched = self.enrich(ctx).await;
        let request = HypothesisRequest {
            company: ctx.state.company_name.clone(),
            ticker: ctx.state.ticker.clone(),
            previous_hypothesis_titles: ctx.state.all_titles(),
            research_gaps: ctx.state.research_gaps.clone(),
            iteration: n,
            enriched_context: enriched,
        };
        match call_worker(
            &*self.hypothesis,
            &request,
            &ctx.state.analysis_id,
            ctx.state.config.worker_timeout_secs,
            &ctx.breakers,
            &ctx.trace,
        )
        .await
        {
            Ok(WorkerOutput { value: batch, .. }) => {
                let generated = batch.hypotheses.len();
                for draft in batch.hypotheses {
                    // Worker ids are provisional; canonical ids are assigned
                    // in arrival order so they stay unique across iterations.
                    let mut hypothesis = draft.into_hypothesis();
                    hypothesis.id = format!("h{}", ctx.state.hypotheses.len() + 1);
                    ctx.state.hypotheses.push(hypothesis);
                }
                assign_impact_ranks(&mut ctx.state.hypotheses);
                Ok(generated)
            }
            Err(err) if ctx.state.hypotheses.is_empty() => Err(err),
            Err(err) => {
                tracing::warn!("hypothesis step degraded at iteration {n}: {err}");
                Ok(0)
            }
        }
    }

    /// Fan research out over the selected hypotheses, bounded by the
    /// configured semaphore. Completions are merged in impact-rank order and
    /// evidence ids assigned centrally, so the result is deterministic
    /// whatever the completion order.
    async fn research_step(
        &self,
        ctx: &mut AnalysisContext,
    ) -> Result<Vec<EvidenceItem>, ResearchError> {
        let mut selected: Vec<Hypothesis> = ctx
            .state
            .hypotheses
            .iter()
            .filter(|h| {
                use research_core::types::Impact;
                match h.impact {
                    Impact::High => true,
                    Impact::Medium => h.confidence < ctx.state.config.refinement_threshold,
                    Impact::Low => false,
                }
            })
            .cloned()
            .collect();
        selected.sort_by_key(|h| h.impact_rank);

        let mut requests = Vec::with_capacity(selected.len());
        for h in selected {
            let sources = match self.data.sources_for(&ctx.state.ticker, &h).await {
                Ok(sources) => sources,
                Err(err) => {
                    tracing::warn!("source fetch failed for {}: {err}", h.id);
                    Vec::new()
                }
            };
            requests.push((
                h.impact_rank,
                h.id.clone(),
                ResearchRequest {
                    prior_evidence: ctx.bundle.for_hypothesis(&h.id).to_vec(),
                    hypothesis: h,
                    sources,
                },
            ));
        }

        let parallelism = ctx.state.config.research_parallelism;
        let timeout_secs = ctx.state.config.worker_timeout_secs;
        let mut completions: Vec<(usize, String, Result<ResearchFindings, ResearchError>)> =
            Vec::with_capacity(requests.len());

        if parallelism <= 1 {
            for (rank, id, request) in requests {
                let result = call_worker(
                    &*self.research,
                    &request,
                    &ctx.state.analysis_id,
                    timeout_secs,
                    &ctx.breakers,
                    &ctx.trace,
                )
                .await
                .map(|output| output.value);
                completions.push((rank, id, result));
            }
        } else {
            let semaphore = Arc::new(Semaphore::new(parallelism));
            let mut join_set = JoinSet::new();
            for (rank, id, request) in requests {
                let agent = self.research.clone();
                let semaphore = semaphore.clone();
                let breakers = ctx.breakers.clone();
                let trace = ctx.trace.clone();
                let analysis_id = ctx.state.analysis_id.clone();
                join_set.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return (
                                rank,
                                id,
                                Err(ResearchError::Fatal("semaphore closed".to_string())),
                            )
                        }
                    };
                    let result = call_worker(
                        &*agent,
                        &request,
                        &analysis_id,
                        timeout_secs,
                        &breakers,
                        &trace,
                    )
                    .await
                    .map(|output| output.value);
                    (rank, id, result)
                });
            }
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(completion) => completions.push(completion),
                    Err(err) => {
                        return Err(ResearchError::Fatal(format!("research task panicked: {err}")))
                    }
                }
            }
            completions.sort_by_key(|(rank, _, _)| *rank);
        }

        let mut new_evidence = Vec::new();
        for (_, hypothesis_id, result) in completions {
            match result {
                Ok(findings) => {
                    // Remap provisional ids to the allocator's sequence,
                    // rewriting contradiction references along the way.
                    let mut id_map = BTreeMap::new();
                    for draft in &findings.evidence_items {
                        id_map.insert(draft.id.clone(), ctx.allocator.allocate());
                    }
                    for draft in findings.evidence_items {
                        let contradicts = draft
                            .contradicts
                            .iter()
                            .map(|r| id_map.get(r).cloned().unwrap_or_else(|| r.clone()))
                            .collect();
                        let item = EvidenceItem {
                            id: id_map[&draft.id].clone(),
                            claim: draft.claim,
                            source_type: draft.source_type,
                            source_reference: draft.source_reference,
                            quote: draft.quote,
                            confidence: draft.confidence,
                            impact_direction: draft.impact_direction,
                            contradicts,
                        };
                        new_evidence.push(item.clone());
                        ctx.bundle.append(&hypothesis_id, item)?;
                    }
                    let updated =
                        evidence_confidence(ctx.bundle.for_hypothesis(&hypothesis_id));
                    if let Some(h) = ctx.state.hypothesis_mut(&hypothesis_id) {
                        h.confidence = updated;
                    }
                    // Quality floor is advisory: logged for the evaluator,
                    // never a hard failure.
                    let accumulated = ctx.bundle.for_hypothesis(&hypothesis_id).len();
                    let diversity = ctx.bundle.source_diversity(&hypothesis_id);
                    if accumulated < 15 || diversity < 4 {
                        tracing::debug!(
                            "evidence below quality target for {hypothesis_id}: {accumulated} items across {diversity} source types"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!("research failed for {hypothesis_id}: {err}");
                    if let Some(h) = ctx.state.hypothesis_mut(&hypothesis_id) {
                        h.uncertain = true;
                    }
                }
            }
        }
        ctx.bundle.check_contradiction_refs()?;
        Ok(new_evidence)
    }

    /// Sequential synthesis in ascending impact rank keeps the confidence
    /// progression reproducible.
    async fn synthesis_step(
        &self,
        ctx: &mut AnalysisContext,
        n: u32,
    ) -> Result<Vec<SynthesisRecord>, ResearchError> {
        let mut targets: Vec<Hypothesis> = ctx
            .state
            .hypotheses
            .iter()
            .filter(|h| should_synthesize(n, h, &ctx.state.config))
            .cloned()
            .collect();
        targets.sort_by_key(|h| h.impact_rank);

        let mut records = Vec::new();
        for h in targets {
            ctx.check_cancel()?;
            let request = SynthesisRequest {
                accumulated_evidence: ctx.bundle.for_hypothesis(&h.id).to_vec(),
                prior_synthesis: ctx.latest_syntheses.get(&h.id).cloned(),
                iteration: n,
                confidence_trajectory: h.confidence_trajectory.clone(),
                hypothesis: h.clone(),
            };
            match call_worker(
                &*self.synthesis,
                &request,
                &ctx.state.analysis_id,
                ctx.state.config.worker_timeout_secs,
                &ctx.breakers,
                &ctx.trace,
            )
            .await
            {
                Ok(WorkerOutput { value: record, .. }) => {
                    let updated = record.synthesis.updated_confidence;
                    if let Some(hypothesis) = ctx.state.hypothesis_mut(&h.id) {
                        hypothesis.confidence = updated;
                        hypothesis.confidence_trajectory.push(updated);
                    }
                    ctx.latest_syntheses.insert(h.id.clone(), record.clone());
                    ctx.synthesis_count += 1;
                    records.push(record);
                }
                Err(err) => {
                    tracing::warn!("synthesis failed for {}: {err}", h.id);
                    if let Some(hypothesis) = ctx.state.hypothesis_mut(&h.id) {
                        hypothesis.uncertain = true;
                    }
                }
            }
        }
        self.trace(
            ctx,
            TraceKind::Checkpoint,
            json!({
                "iteration": n,
                "synthesized": records.iter().map(|r| r.hypothesis_id.clone()).collect::<Vec<_>>(),
            }),
        )?;
        Ok(records)
    }

    /// Iteration-mode evaluation. A failed evaluation degrades to the prior
    /// score rather than aborting the iteration.
    async fn evaluation_step(&self, ctx: &mut AnalysisContext, n: u32) -> f64 {
        let request = EvaluationRequest {
            evaluation_type: EvaluationType::Iteration,
            output: json!({
                "iteration": n,
                "hypotheses": ctx.state.hypotheses.len(),
                "evidence_items": ctx.bundle.len(),
                "overall_confidence": aggregate_confidence(&ctx.state.hypotheses, &ctx.bundle),
                "syntheses": ctx.synthesis_count,
            }),
            criteria: EvaluationCriteria {
                dimensions: ITERATION_RUBRIC.iter().map(|d| d.to_string()).collect(),
                threshold: ITERATION_THRESHOLD,
            },
        };
        match call_worker(
            &*self.evaluator,
            &request,
            &ctx.state.analysis_id,
            ctx.state.config.worker_timeout_secs,
            &ctx.breakers,
            &ctx.trace,
        )
        .await
        {
            Ok(WorkerOutput { value, .. }) => value.overall_score,
            Err(err) => {
                tracing::warn!("iteration evaluation failed: {err}");
                ctx.state.quality_scores.last().copied().unwrap_or(0.0)
            }
        }
    }

    async fn enrich(&self, ctx: &AnalysisContext) -> Option<EnrichedContext> {
        let memory = self.memory.as_ref()?;
        let mut filters = std::collections::HashMap::new();
        filters.insert("ticker".to_string(), ctx.state.ticker.clone());
        let query = format!(
            "{} {} {}",
            ctx.state.ticker,
            ctx.state.company_name,
            ctx.state.research_gaps.join(" ")
        );
        match memory
            .query(&query, &filters, &MemorySource::ALL, MEMORY_RESULTS_PER_SOURCE)
            .await
        {
            Ok(results) => {
                let context = to_enriched_context(&results);
                (!context.is_empty()).then_some(context)
            }
            Err(err) => {
                tracing::warn!("memory retrieval degraded to empty context: {err}");
                None
            }
        }
    }

    /// Assemble the valuation, build the narrative, grade it, persist
    /// terminal state. Under strict validation an inconsistent
    /// recommendation triggers exactly one regeneration.
    async fn finalize(
        &self,
        ctx: &mut AnalysisContext,
        stop_reason: StopReason,
    ) -> Result<AnalysisOutcome, ResearchError> {
        ctx.check_cancel()?;
        self.trace(
            ctx,
            TraceKind::Planning,
            json!({"phase": "finalizing", "stop_reason": stop_reason}),
        )?;

        let assembled =
            assemble_valuation_inputs(&ctx.snapshot, &ctx.state.hypotheses, &ctx.bundle);
        let valuation = calculate_dcf(&assembled.inputs)
            .map_err(|e| ResearchError::InvalidInputs(e.to_string()))?;
        self.trace(
            ctx,
            TraceKind::ToolCall,
            json!({
                "tool": "calculate_dcf",
                "value_per_share": valuation.value_per_share,
                "provenance": assembled.provenance,
            }),
        )?;

        let mut limitations: Vec<String> = ctx
            .state
            .hypotheses
            .iter()
            .filter(|h| h.uncertain)
            .map(|h| format!("hypothesis '{}' remained uncertain after worker failures", h.title))
            .collect();
        if ctx.governor.level() > 0 {
            limitations.push(format!(
                "budget governor degraded the configuration to level {}",
                ctx.governor.level()
            ));
        }
        let skipped: Vec<u32> = self
            .config
            .checkpoints
            .iter()
            .filter(|c| !ctx.state.config.checkpoints.contains(c))
            .copied()
            .collect();
        if !skipped.is_empty() {
            limitations.push(format!("checkpoints {skipped:?} were skipped under budget pressure"));
        }

        let validated: Vec<Hypothesis> = ctx
            .state
            .hypotheses
            .iter()
            .filter(|h| h.confidence >= ctx.state.config.refinement_threshold)
            .cloned()
            .collect();
        let request = NarrativeRequest {
            ticker: ctx.state.ticker.clone(),
            company: ctx.state.company_name.clone(),
            validated_hypotheses: validated.clone(),
            evidence: ctx.bundle.all_items().cloned().collect(),
            synthesis_records: ctx.latest_syntheses.values().cloned().collect(),
            valuation_result: valuation.clone(),
            current_price: ctx.snapshot.current_price,
            compressed_history: ctx.state.history.compressed_view(),
            limitations: limitations.clone(),
        };

        let mut report = self.build_report(ctx, &request).await?;
        let validator = FullValidator::new(self.evaluator.clone(), ctx.state.config.hold_band);
        let mut outcome = validator
            .validate(&report)
            .await
            .map_err(|e| ResearchError::Fatal(format!("validation pipeline failed: {e}")))?;
        self.trace_validation(ctx, &outcome)?;

        let inconsistent = outcome.heuristic_findings.iter().any(|f| {
            f.severity == Severity::High && f.message.contains("recommendation")
        });
        if inconsistent && ctx.state.config.strict_validation {
            tracing::warn!("recommendation inconsistent under strict validation, regenerating once");
            let mut retry_request = request.clone();
            retry_request
                .limitations
                .push("align the recommendation with the fair-value gap".to_string());
            report = self.build_report(ctx, &retry_request).await?;
            outcome = validator
                .validate(&report)
                .await
                .map_err(|e| ResearchError::Fatal(format!("validation pipeline failed: {e}")))?;
            self.trace_validation(ctx, &outcome)?;
        }

        self.store
            .save_final_report(&ctx.state.analysis_id, &report)
            .map_err(|e| ResearchError::State(e.to_string()))?;
        ctx.state.status = AnalysisStatus::Completed;
        ctx.state.cumulative_cost_usd = ctx.trace.total_cost();
        self.persist(ctx, &validated)?;

        tracing::info!(
            "analysis {} completed: grade {}, {} iterations, ${:.2}",
            ctx.state.analysis_id,
            outcome.grade,
            ctx.state.current_iteration,
            ctx.state.cumulative_cost_usd
        );

        Ok(AnalysisOutcome {
            analysis_id: ctx.state.analysis_id.clone(),
            report,
            validation: outcome,
            stop_reason,
            iterations: ctx.state.current_iteration,
            total_cost_usd: ctx.state.cumulative_cost_usd,
        })
    }

    async fn build_report(
        &self,
        ctx: &mut AnalysisContext,
        request: &NarrativeRequest,
    ) -> Result<FinalReport, ResearchError> {
        let output = call_worker(
            &*self.narrative,
            request,
            &ctx.state.analysis_id,
            ctx.state.config.worker_timeout_secs,
            &ctx.breakers,
            &ctx.trace,
        )
        .await
        .map_err(|e| ResearchError::Fatal(format!("narrative builder failed: {e}")))?;

        let mut report = output.value;
        // The deterministic kernel owns the headline numbers.
        report.valuation.fair_value = request.valuation_result.value_per_share;
        report.valuation.current_price = request.current_price;
        if report.valuation.methodology.trim().is_empty() {
            report.valuation.methodology =
                "FCFF DCF with stable-growth terminal value".to_string();
        }
        Ok(report)
    }

    fn trace_validation(
        &self,
        ctx: &AnalysisContext,
        outcome: &ValidationOutcome,
    ) -> Result<(), ResearchError> {
        self.trace(
            ctx,
            TraceKind::Evaluation,
            json!({
                "grade": outcome.grade.as_str(),
                "points": outcome.points,
                "passed": outcome.passed,
                "schema_errors": outcome.schema_errors.len(),
                "structure_findings": outcome.structure.findings.len(),
                "heuristic_findings": outcome.heuristic_findings.len(),
            }),
        )
    }

    fn persist(
        &self,
        ctx: &AnalysisContext,
        validated: &[Hypothesis],
    ) -> Result<(), ResearchError> {
        self.store
            .save_analysis_state(&ctx.state)
            .and_then(|_| {
                self.store
                    .save_evidence_bundle(&ctx.state.analysis_id, &ctx.bundle)
            })
            .and_then(|_| {
                self.store
                    .save_validated_hypotheses(&ctx.state.analysis_id, validated)
            })
            .map_err(|e| ResearchError::State(e.to_string()))
    }

    fn trace(
        &self,
        ctx: &AnalysisContext,
        kind: TraceKind,
        details: serde_json::Value,
    ) -> Result<(), ResearchError> {
        ctx.trace
            .append(&TraceEvent::new(&ctx.state.analysis_id, kind, details))
            .map_err(|e| ResearchError::State(e.to_string()))
    }
}
