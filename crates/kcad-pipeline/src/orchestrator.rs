//! 流水线编排
//!
//! 一次运行依次经过 解析 → 校验 → 转换 → 规整 → 导出。
//! 模式错误、未知分区、取消或“提示按阻断处理”策略会使整次运行进入 `Failed`；
//! 单个地块的问题只把该地块排除在后续阶段之外。
//!
//! 每次运行都从全新的 `Idle` 状态和新解析出的地块开始，运行之间不共享可变状态。

use crate::cancel::CancellationToken;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::report::{DiagnosticsReport, IssueEntry, ParcelEntry, StageTimer};
use crate::sink::OutputSink;
use crate::state::{PipelineState, StateTransition};
use chrono::Utc;
use kcad_core::crs::{CoordinateSystemReference, LocalFrame, ZoneTable};
use kcad_core::issue::{IssueKind, IssueLocation, IssueLog, ValidationIssue};
use kcad_core::parcel::{CadastralNumber, Parcel};
use kcad_core::precision::{NormalizeOutcome, PrecisionNormalizer};
use kcad_core::topology::TopologyValidator;
use kcad_core::transform::{TransformEngine, TransformPlan};
use kcad_file::{dxf_io, EgrnParser, ExportBatch, ExportFormatter, OutputFormat};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use tracing::{debug, error, info, warn};

/// 运行结果：诊断报告与退出码
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: DiagnosticsReport,
    /// 0 完成且无阻断问题，1 完成但部分地块有阻断问题，2 失败
    pub exit_code: i32,
}

impl RunOutcome {
    pub fn state(&self) -> PipelineState {
        self.report.final_state
    }

    pub fn is_completed(&self) -> bool {
        self.report.final_state == PipelineState::Completed
    }
}

/// 流水线
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    /// 配置中指定的分区表；None 时用内置表
    zones: Option<ZoneTable>,
    /// 直接给出或由同名点标定的工程坐标系
    local_frame: Option<LocalFrame>,
}

impl Pipeline {
    /// 校验配置，按需加载分区表
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let zones = match &config.zone_table {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                let table = ZoneTable::from_json(&text)?;
                info!("Loaded {} zones from {}", table.entries().len(), path.display());
                Some(table)
            }
            None => None,
        };
        let local_frame = config.resolve_local_frame()?;
        Ok(Self {
            config,
            zones,
            local_frame,
        })
    }

    /// 使用给定的分区表
    pub fn with_zones(config: PipelineConfig, zones: ZoneTable) -> Result<Self> {
        config.validate()?;
        let local_frame = config.resolve_local_frame()?;
        Ok(Self {
            config,
            zones: Some(zones),
            local_frame,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // 闭包让 'static 的内置表收窄到 &self 的生命周期
    #[allow(clippy::redundant_closure)]
    pub fn zones(&self) -> &ZoneTable {
        self.zones.as_ref().unwrap_or_else(|| ZoneTable::builtin())
    }

    /// 执行一次运行。输出文件名以 `stem` 为主干写入 `sink`
    pub fn run<R: Read>(
        &self,
        input: R,
        stem: &str,
        sink: &mut dyn OutputSink,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let mut run = Run::new(self, cancel);
        info!("Pipeline run {} started", run.report.run_id);
        let result = run.execute(input, stem, sink);
        run.finish(result)
    }
}

fn checkpoint(cancel: &CancellationToken, state: PipelineState) -> Result<()> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled(state))
    } else {
        Ok(())
    }
}

/// 单次运行的全部状态
struct Run<'p> {
    pipeline: &'p Pipeline,
    cancel: &'p CancellationToken,
    state: PipelineState,
    report: DiagnosticsReport,
    /// 文档顺序；被排除的地块仍留在这里，由问题表判定资格
    parcels: Vec<Parcel>,
    log: IssueLog,
}

impl<'p> Run<'p> {
    fn new(pipeline: &'p Pipeline, cancel: &'p CancellationToken) -> Self {
        Self {
            pipeline,
            cancel,
            state: PipelineState::Idle,
            report: DiagnosticsReport::new(),
            parcels: Vec::new(),
            log: IssueLog::new(),
        }
    }

    fn config(&self) -> &'p PipelineConfig {
        &self.pipeline.config
    }

    fn batch_size(&self) -> usize {
        self.config().batch_size.max(1)
    }

    fn transition(&mut self, to: PipelineState) {
        debug_assert!(self.state.can_transition_to(to), "{} -> {}", self.state, to);
        info!("Pipeline {} -> {}", self.state, to);
        self.report.transitions.push(StateTransition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
    }

    /// 在阶段边界检查取消，进入阶段并计时
    fn stage<T>(
        &mut self,
        stage: PipelineState,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        checkpoint(self.cancel, self.state)?;
        self.transition(stage);
        let timer = StageTimer::start(stage);
        let result = f(self);
        self.report.stage_timings.push(timer.stop());
        result
    }

    fn is_eligible(&self, id: &CadastralNumber) -> bool {
        !self.log.has_blocking(id)
    }

    fn record(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        for issue in issues {
            if issue.is_blocking() {
                warn!("Excluded {} during {}: {}", issue.parcel_id, self.state, issue.message);
            } else {
                debug!("{}", issue);
            }
            self.log.record(issue);
        }
    }

    fn execute<R: Read>(&mut self, input: R, stem: &str, sink: &mut dyn OutputSink) -> Result<()> {
        self.stage(PipelineState::Parsing, |run| run.parse(input))?;
        self.stage(PipelineState::Validating, Run::validate)?;
        self.stage(PipelineState::Transforming, Run::transform)?;
        self.stage(PipelineState::Normalizing, Run::normalize)?;
        self.stage(PipelineState::Exporting, |run| run.export(stem, sink))
    }

    fn parse<R: Read>(&mut self, mut input: R) -> Result<()> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        let output = EgrnParser::new(self.config().parse_options()).parse(&bytes)?;
        info!(
            "Parsed {} parcels from {} ({}), {} parse issues",
            output.parcels.len(),
            output.document_kind,
            output.encoding,
            output.issues.len()
        );
        self.report.document_kind = Some(output.document_kind);
        self.report.encoding = Some(output.encoding);
        self.report.parse_issues = output.issues;
        self.report.parcels = output
            .parcels
            .iter()
            .map(|p| ParcelEntry::new(p.id.as_str()))
            .collect();
        self.parcels = output.parcels;
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let validator = TopologyValidator::new(self.config().topology_config());
        let mut issues = Vec::new();
        for chunk in self.parcels.chunks(self.batch_size()) {
            checkpoint(self.cancel, self.state)?;
            let found: Vec<Vec<ValidationIssue>> =
                chunk.par_iter().map(|p| validator.check_parcel(p)).collect();
            issues.extend(found.into_iter().flatten());
        }
        self.record(issues);

        // 所有单地块检查完成后再做相邻检查
        checkpoint(self.cancel, self.state)?;
        let clean: Vec<&Parcel> = self
            .parcels
            .iter()
            .filter(|p| !self.log.has_blocking(&p.id))
            .collect();
        let adjacency = validator.check_adjacency(&clean);
        debug!("Adjacency check over {} parcels: {} issues", clean.len(), adjacency.len());
        self.record(adjacency);
        self.enforce_warning_policy()
    }

    /// 地块的源坐标系：配置 → 记录中的 sk_id → 按地籍区查表
    fn source_crs(
        &self,
        engine: &TransformEngine<'_>,
        parcel: &Parcel,
    ) -> Result<CoordinateSystemReference> {
        if let Some(ident) = &self.config().source_crs {
            return Ok(engine.resolve(ident)?);
        }
        if let Some(name) = &parcel.source_crs_name {
            return Ok(engine.resolve(name)?);
        }
        Ok(engine
            .zones()
            .for_district(parcel.id.region(), parcel.id.district())?)
    }

    /// 目标坐标系；未配置时沿用第一个地块的源坐标系
    fn target_crs(
        &self,
        engine: &TransformEngine<'_>,
        source: &CoordinateSystemReference,
    ) -> Result<CoordinateSystemReference> {
        let base = match &self.config().target_crs {
            Some(ident) => engine.resolve(ident)?,
            None => source.clone(),
        };
        match &self.pipeline.local_frame {
            Some(frame) => Ok(CoordinateSystemReference::local(base, frame.clone())?),
            None => Ok(base),
        }
    }

    fn transform(&mut self) -> Result<()> {
        let engine = TransformEngine::new(self.pipeline.zones());
        let mut plans: HashMap<String, TransformPlan> = HashMap::new();
        let mut assignment: Vec<Option<String>> = vec![None; self.parcels.len()];
        let mut target: Option<CoordinateSystemReference> = None;

        for (i, parcel) in self.parcels.iter().enumerate() {
            if !self.is_eligible(&parcel.id) {
                continue;
            }
            let source = self.source_crs(&engine, parcel)?;
            if target.is_none() {
                let t = self.target_crs(&engine, &source)?;
                info!("Target coordinate system: {}", t.id);
                target = Some(t);
            }
            let Some(target) = target.as_ref() else {
                continue;
            };
            if !plans.contains_key(&source.id) {
                let plan = engine.plan(&source, target)?;
                debug!(
                    "Plan {} -> {}{}",
                    source.id,
                    target.id,
                    if plan.is_identity() { " (identity)" } else { "" }
                );
                plans.insert(source.id.clone(), plan);
            }
            assignment[i] = Some(source.id);
        }
        self.report.target_crs = target.map(|t| t.id);

        let batch = self.batch_size();
        let mut failures = Vec::new();
        for (chunk_index, chunk) in self.parcels.chunks_mut(batch).enumerate() {
            checkpoint(self.cancel, PipelineState::Transforming)?;
            let offset = chunk_index * batch;
            let found: Vec<ValidationIssue> = chunk
                .par_iter_mut()
                .enumerate()
                .filter_map(|(j, parcel)| {
                    let plan = assignment[offset + j].as_ref().and_then(|k| plans.get(k))?;
                    plan.apply_parcel(parcel).err().map(|e| {
                        ValidationIssue::new(
                            parcel.id.clone(),
                            IssueKind::TransformFailure,
                            IssueLocation::Parcel,
                            e.to_string(),
                        )
                    })
                })
                .collect();
            failures.extend(found);
        }
        self.record(failures);
        Ok(())
    }

    fn normalize(&mut self) -> Result<()> {
        let normalizer = PrecisionNormalizer::new(self.config().precision_config());
        let eligible: Vec<bool> = self.parcels.iter().map(|p| self.is_eligible(&p.id)).collect();

        let batch = self.batch_size();
        let mut outcomes: Vec<(usize, NormalizeOutcome)> = Vec::new();
        for (chunk_index, chunk) in self.parcels.chunks_mut(batch).enumerate() {
            checkpoint(self.cancel, PipelineState::Normalizing)?;
            let offset = chunk_index * batch;
            let found: Vec<(usize, NormalizeOutcome)> = chunk
                .par_iter_mut()
                .enumerate()
                .filter(|(j, _)| eligible[offset + *j])
                .map(|(j, parcel)| (offset + j, normalizer.normalize_parcel(parcel)))
                .collect();
            outcomes.extend(found);
        }

        for (i, outcome) in outcomes {
            self.report.parcels[i].precision = Some(outcome.stats);
            self.record(outcome.issues);
        }
        self.enforce_warning_policy()
    }

    fn export(&mut self, stem: &str, sink: &mut dyn OutputSink) -> Result<()> {
        let config = self.config();
        let formatter = ExportFormatter::new(config.output_format, config.export_options());
        let eligible: Vec<&Parcel> = self
            .parcels
            .iter()
            .filter(|p| !self.log.has_blocking(&p.id))
            .collect();

        let mut batch = ExportBatch::default();
        for chunk in eligible.chunks(self.batch_size()) {
            checkpoint(self.cancel, self.state)?;
            batch.merge(formatter.build(chunk));
        }
        let skipped = std::mem::take(&mut batch.skipped);
        self.record(skipped);

        checkpoint(self.cancel, self.state)?;
        let files = formatter.render(&batch, stem)?;
        if config.verify_dxf && config.output_format == OutputFormat::Dxf {
            for file in &files {
                dxf_io::verify(&file.bytes, &batch)
                    .map_err(|e| PipelineError::Verification(e.to_string()))?;
            }
            debug!("DXF read-back verified");
        }
        // 同组文件（如 MIF/MID）要么全部写出，要么全部撤回
        let mut committed: Vec<&str> = Vec::new();
        for file in &files {
            if let Err(e) = sink.write_file(&file.name, &file.bytes) {
                for name in committed.iter().rev() {
                    if let Err(discard) = sink.discard(name) {
                        warn!("Failed to discard {}: {}", name, discard);
                    }
                }
                return Err(e.into());
            }
            committed.push(&file.name);
        }
        self.report.outputs = sink.written();

        let exported: HashSet<&CadastralNumber> = batch.parcels.iter().map(|s| &s.id).collect();
        for (entry, parcel) in self.report.parcels.iter_mut().zip(&self.parcels) {
            entry.exported = exported.contains(&parcel.id);
        }
        info!(
            "Exported {} parcels ({} records) as {}",
            exported.len(),
            batch.records.len(),
            formatter.format().name()
        );
        Ok(())
    }

    /// 提示按阻断处理时，任何提示性问题都使运行失败
    fn enforce_warning_policy(&mut self) -> Result<()> {
        if !self.config().treat_warnings_as_blocking {
            return Ok(());
        }
        let advisory = self.log.iter().filter(|i| !i.is_blocking()).count()
            + self
                .report
                .parse_issues
                .iter()
                .filter(|i| !i.is_blocking())
                .count();
        if advisory > 0 {
            return Err(PipelineError::WarningPolicy(format!(
                "{} advisory issue(s) after {}",
                advisory, self.state
            )));
        }
        Ok(())
    }

    /// 汇总地块条目并进入终止状态
    fn finish(mut self, result: Result<()>) -> RunOutcome {
        for (entry, parcel) in self.report.parcels.iter_mut().zip(&self.parcels) {
            let issues = self.log.issues_for(&parcel.id);
            entry.issues = issues.iter().map(IssueEntry::from).collect();
            entry.verdict = self.log.verdict(&parcel.id);
        }

        let exit_code = match result {
            Ok(()) => {
                self.transition(PipelineState::Completed);
                if self.report.has_blocking() {
                    1
                } else {
                    0
                }
            }
            Err(err) => {
                error!("Pipeline failed during {}: {}", self.state, err);
                self.report.failure = Some(err.to_string());
                for entry in self.report.parcels.iter_mut() {
                    entry.exported = false;
                }
                self.transition(PipelineState::Failed);
                2
            }
        };

        self.report.final_state = self.state;
        self.report.exit_code = exit_code;
        self.report.finished_at = Some(Utc::now());
        info!(
            "Pipeline run {} finished: {} (exit code {}), {} of {} parcels exported",
            self.report.run_id,
            self.state,
            exit_code,
            self.report.exported_count(),
            self.report.parcels.len()
        );
        RunOutcome {
            report: self.report,
            exit_code,
        }
    }
}
